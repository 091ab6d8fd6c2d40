pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod store;

pub use chunking::{
    classify_chunk, extract_keywords, split_documents, split_text, ChunkingOptions, TextChunk,
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, SECURITY_VOCABULARY,
};
pub use config::{KnowledgeConfig, API_KEY_ENV};
pub use embeddings::{
    cosine_similarity, CharacterNgramEmbedder, Embedder, EmbeddingOptions, OpenAiEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
};
pub use error::{EmbedError, IndexError, IngestError, SearchError};
pub use ingest::{classify_document, discover_text_files, document_stats, load_all_documents};
pub use models::{
    Chunk, ChunkKind, ChunkMetadata, Document, DocumentStats, DocumentType, FieldFilter,
    MetadataField, MetadataFilter, RetrievalOutcome, SearchHit,
};
pub use orchestrator::{
    HealthReport, HealthStatus, KnowledgeOrchestrator, KnowledgeStats, Lifecycle,
};
pub use retriever::{
    format_for_prompt, maximal_marginal_relevance, Retriever, RetrieverOptions, SearchKind,
    SearchStats,
};
pub use store::{
    CollectionMetadata, EmbeddingRecord, IndexStats, ScoredRecord, Snapshot, VectorStore,
    DEFAULT_COLLECTION,
};
