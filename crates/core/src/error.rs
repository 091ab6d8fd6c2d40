use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("documents directory not found: {0}")]
    DocsDirNotFound(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("no text documents found in {0}")]
    EmptyCorpus(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider returned {status}: {details}")]
    Provider { status: u16, details: String },

    #[error("invalid response from embedding provider: {0}")]
    Response(String),

    #[error("embedding dimension {got} does not match model dimension {want}")]
    Dimensions { got: usize, want: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no embedding credential available: {0}")]
    MissingCredential(String),

    #[error("embedder not initialized")]
    EmbedderNotInitialized,

    #[error("no snapshot loaded for collection {0}")]
    SnapshotNotLoaded(String),

    #[error("nothing to index: {0}")]
    EmptyInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("knowledge base not ready: {0}")]
    NotReady(String),

    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
}

impl From<EmbedError> for SearchError {
    fn from(error: EmbedError) -> Self {
        SearchError::RetrievalUnavailable(error.to_string())
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
