use crate::chunking::ChunkingOptions;
use crate::embeddings::EmbeddingOptions;
use crate::retriever::RetrieverOptions;
use crate::store::DEFAULT_COLLECTION;
use std::env;
use std::path::PathBuf;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration for the knowledge base.
///
/// Defaults mirror the service's production tuning: 1000/200 chunking,
/// MMR retrieval with k=8 / fetch_k=16 / lambda=0.7, ada-002 embeddings.
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    pub docs_dir: PathBuf,
    pub persist_dir: PathBuf,
    pub collection: String,
    pub api_key: Option<String>,
    pub embedding: EmbeddingOptions,
    pub chunking: ChunkingOptions,
    pub retriever: RetrieverOptions,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("docs"),
            persist_dir: PathBuf::from("vectorstore"),
            collection: DEFAULT_COLLECTION.to_string(),
            api_key: None,
            embedding: EmbeddingOptions::default(),
            chunking: ChunkingOptions::default(),
            retriever: RetrieverOptions::default(),
        }
    }
}

impl KnowledgeConfig {
    /// Defaults plus the embedding credential from the environment.
    pub fn from_env() -> Self {
        Self {
            api_key: env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty()),
            ..Self::default()
        }
    }

    pub fn with_dirs(mut self, docs_dir: impl Into<PathBuf>, persist_dir: impl Into<PathBuf>) -> Self {
        self.docs_dir = docs_dir.into();
        self.persist_dir = persist_dir.into();
        self
    }
}
