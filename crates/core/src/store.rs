use crate::embeddings::{Embedder, EmbeddingOptions, OpenAiEmbedder};
use crate::error::{EmbedError, IndexError, SearchError};
use crate::ingest::discover_text_files;
use crate::models::{Chunk, ChunkMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use uuid::Uuid;

pub const DEFAULT_COLLECTION: &str = "security_knowledge";
pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0";

const COLLECTION_DESCRIPTION: &str = "Security methodology knowledge base";
const COVERED_FRAMEWORKS: [&str; 4] = ["MAGERIT", "OCTAVE", "ISO27001", "NIST"];

/// The persisted unit of the index: one chunk with its vector and metadata.
/// Never partially updated; updates are delete-then-insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub schema_version: String,
    pub snapshot_id: Uuid,
    pub collection: String,
    pub description: String,
    pub version: String,
    pub language: String,
    pub domain: String,
    pub frameworks: Vec<String>,
    pub embedding_model: String,
    pub built_at: DateTime<Utc>,
}

/// The durable state of the index: collection metadata plus all records,
/// stored as one JSON document per collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: CollectionMetadata,
    pub records: Vec<EmbeddingRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub record_count: usize,
    pub collection: String,
    pub persist_directory: String,
    pub cache_exists: bool,
    pub document_types: HashMap<String, usize>,
    pub languages: Vec<String>,
    pub embedding_model: Option<String>,
}

/// A record paired with its cosine similarity to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub score: f32,
    pub record: EmbeddingRecord,
}

/// Embedding-backed vector index with a durable JSON snapshot.
///
/// Mutations (build/add/update/purge) are serialized by a per-store gate
/// and re-persist the snapshot; searches are read-only and run concurrently
/// against the resident snapshot, never waiting on an in-progress build.
pub struct VectorStore {
    persist_dir: PathBuf,
    collection: String,
    embedder: RwLock<Option<Arc<dyn Embedder>>>,
    snapshot: RwLock<Option<Snapshot>>,
    write_gate: Mutex<()>,
}

impl VectorStore {
    pub fn new(persist_dir: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            persist_dir: persist_dir.into(),
            collection: collection.into(),
            embedder: RwLock::new(None),
            snapshot: RwLock::new(None),
            write_gate: Mutex::new(()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.persist_dir.join(format!("{}.json", self.collection))
    }

    /// Configure the remote embedding provider. Fails when no credential
    /// is available; never overwrites an already-configured embedder.
    pub async fn initialize_embedder(
        &self,
        api_key: Option<&str>,
        options: EmbeddingOptions,
    ) -> Result<(), IndexError> {
        let key = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                IndexError::MissingCredential("embedding api key is not set".to_string())
            })?;

        let mut slot = self.embedder.write().await;
        if slot.is_none() {
            let embedder = OpenAiEmbedder::new(key, options)?;
            *slot = Some(Arc::new(embedder));
            tracing::info!("embedding provider initialized");
        }
        Ok(())
    }

    /// Inject an embedder directly (offline providers, tests).
    pub async fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        *self.embedder.write().await = Some(embedder);
    }

    pub async fn embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedder.read().await.clone()
    }

    async fn require_embedder(&self) -> Result<Arc<dyn Embedder>, IndexError> {
        self.embedder().await.ok_or(IndexError::EmbedderNotInitialized)
    }

    /// Embed all chunks and replace the durable snapshot.
    pub async fn build(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::EmptyInput(
                "no chunks to index".to_string(),
            ));
        }

        let embedder = self.require_embedder().await?;
        let _gate = self.write_gate.lock().await;

        let vectors = embed_chunks(Arc::clone(&embedder), chunks).await?;
        let records = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord {
                chunk_id: chunk.chunk_id.clone(),
                vector,
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
            })
            .collect::<Vec<_>>();

        let snapshot = Snapshot {
            metadata: self.collection_metadata(embedder.model_name()),
            records,
        };

        self.persist(&snapshot).await?;
        let count = snapshot.records.len();
        *self.snapshot.write().await = Some(snapshot);

        tracing::info!(records = count, collection = %self.collection, "vector index built");
        Ok(())
    }

    fn collection_metadata(&self, embedding_model: &str) -> CollectionMetadata {
        CollectionMetadata {
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            snapshot_id: Uuid::new_v4(),
            collection: self.collection.clone(),
            description: COLLECTION_DESCRIPTION.to_string(),
            version: "1.0".to_string(),
            language: "en".to_string(),
            domain: "cybersecurity".to_string(),
            frameworks: COVERED_FRAMEWORKS.iter().map(|f| f.to_string()).collect(),
            embedding_model: embedding_model.to_string(),
            built_at: Utc::now(),
        }
    }

    /// Load the persisted snapshot into memory. A missing file, a snapshot
    /// that fails to decode, or one with zero records all count as absent.
    pub async fn load(&self) -> Option<usize> {
        let path = self.snapshot_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "snapshot unreadable, treating as absent");
                return None;
            }
        };

        let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "snapshot corrupt, treating as absent");
                return None;
            }
        };

        if snapshot.records.is_empty() {
            tracing::warn!(path = %path.display(), "snapshot exists but holds no records");
            return None;
        }

        let count = snapshot.records.len();
        *self.snapshot.write().await = Some(snapshot);
        tracing::info!(records = count, collection = %self.collection, "vector index loaded from snapshot");
        Some(count)
    }

    /// Whether the corpus has changed since the snapshot was built.
    ///
    /// Compares file modification times against the snapshot's stored build
    /// time only; a touch without a content change still forces a rebuild.
    pub async fn should_rebuild(&self, docs_dir: &Path) -> bool {
        let built_at = match self.snapshot.read().await.as_ref() {
            Some(snapshot) => snapshot.metadata.built_at,
            None => return true,
        };

        for path in discover_text_files(docs_dir) {
            let modified = match path.metadata().and_then(|meta| meta.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "cannot read mtime, keeping snapshot");
                    continue;
                }
            };

            if modified > built_at {
                tracing::info!(path = %path.display(), "document newer than snapshot");
                return true;
            }
        }

        false
    }

    /// Append chunks to the resident snapshot and re-persist.
    pub async fn add(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::EmptyInput("no chunks to add".to_string()));
        }

        let embedder = self.require_embedder().await?;
        let _gate = self.write_gate.lock().await;

        let vectors = embed_chunks(Arc::clone(&embedder), chunks).await?;

        let mut slot = self.snapshot.write().await;
        let snapshot = slot
            .as_mut()
            .ok_or_else(|| IndexError::SnapshotNotLoaded(self.collection.clone()))?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            snapshot.records.push(EmbeddingRecord {
                chunk_id: chunk.chunk_id.clone(),
                vector,
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
            });
        }
        snapshot.metadata.built_at = Utc::now();

        let to_write = snapshot.clone();
        drop(slot);

        self.persist(&to_write).await?;
        tracing::info!(added = chunks.len(), collection = %self.collection, "records added");
        Ok(())
    }

    /// Replace one record. The underlying snapshot has no partial-update
    /// primitive, so this is a delete followed by an insert.
    pub async fn update(&self, chunk_id: &str, chunk: &Chunk) -> Result<(), IndexError> {
        let embedder = self.require_embedder().await?;
        let _gate = self.write_gate.lock().await;

        let vectors = embed_chunks(Arc::clone(&embedder), std::slice::from_ref(chunk)).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embed(EmbedError::Response("empty embedding".into())))?;

        let mut slot = self.snapshot.write().await;
        let snapshot = slot
            .as_mut()
            .ok_or_else(|| IndexError::SnapshotNotLoaded(self.collection.clone()))?;

        snapshot.records.retain(|record| record.chunk_id != chunk_id);
        snapshot.records.push(EmbeddingRecord {
            chunk_id: chunk.chunk_id.clone(),
            vector,
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
        });
        snapshot.metadata.built_at = Utc::now();

        let to_write = snapshot.clone();
        drop(slot);

        self.persist(&to_write).await?;
        tracing::info!(chunk_id, collection = %self.collection, "record updated");
        Ok(())
    }

    /// Top-k records by cosine similarity. Read-only; concurrent searches
    /// never contend with each other.
    pub async fn similarity_search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>, SearchError> {
        let slot = self.snapshot.read().await;
        let snapshot = slot.as_ref().ok_or_else(|| {
            SearchError::NotReady(format!("collection {} has no snapshot", self.collection))
        })?;

        let mut scored: Vec<ScoredRecord> = snapshot
            .records
            .iter()
            .map(|record| ScoredRecord {
                score: crate::embeddings::cosine_similarity(query_vector, &record.vector),
                record: record.clone(),
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub async fn is_loaded(&self) -> bool {
        self.snapshot.read().await.is_some()
    }

    pub async fn record_count(&self) -> usize {
        self.snapshot
            .read()
            .await
            .as_ref()
            .map(|snapshot| snapshot.records.len())
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> IndexStats {
        let slot = self.snapshot.read().await;

        let mut document_types: HashMap<String, usize> = HashMap::new();
        let mut languages: Vec<String> = Vec::new();
        let mut embedding_model = None;
        let mut record_count = 0;

        if let Some(snapshot) = slot.as_ref() {
            record_count = snapshot.records.len();
            embedding_model = Some(snapshot.metadata.embedding_model.clone());
            for record in &snapshot.records {
                *document_types
                    .entry(record.metadata.document_type.as_str().to_string())
                    .or_insert(0) += 1;
                if !languages.contains(&record.metadata.language) {
                    languages.push(record.metadata.language.clone());
                }
            }
        }

        IndexStats {
            record_count,
            collection: self.collection.clone(),
            persist_directory: self.persist_dir.display().to_string(),
            cache_exists: self.snapshot_path().is_file(),
            document_types,
            languages,
            embedding_model,
        }
    }

    /// Drop the durable snapshot and the resident copy.
    pub async fn purge(&self) -> Result<(), IndexError> {
        let _gate = self.write_gate.lock().await;

        match tokio::fs::remove_file(self.snapshot_path()).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(IndexError::Io(error)),
        }

        *self.snapshot.write().await = None;
        tracing::info!(collection = %self.collection, "snapshot purged");
        Ok(())
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), IndexError> {
        tokio::fs::create_dir_all(&self.persist_dir).await?;
        let bytes = serde_json::to_vec(snapshot)?;
        tokio::fs::write(self.snapshot_path(), bytes).await?;
        Ok(())
    }
}

/// Embed chunk texts, fanning batches out across tasks. Batch order is
/// restored before returning so vectors line up with their chunks.
async fn embed_chunks(
    embedder: Arc<dyn Embedder>,
    chunks: &[Chunk],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let batch_size = embedder.batch_size().max(1);
    let batches: Vec<Vec<String>> = chunks
        .chunks(batch_size)
        .map(|batch| batch.iter().map(|chunk| chunk.text.clone()).collect())
        .collect();

    let mut join_set = JoinSet::new();
    for (batch_no, texts) in batches.into_iter().enumerate() {
        let embedder = Arc::clone(&embedder);
        join_set.spawn(async move {
            let vectors = embedder.embed_batch(&texts).await;
            (batch_no, vectors)
        });
    }

    let mut per_batch: Vec<Vec<Vec<f32>>> = vec![Vec::new(); chunks.len().div_ceil(batch_size)];
    while let Some(joined) = join_set.join_next().await {
        let (batch_no, vectors) = joined
            .map_err(|error| EmbedError::Response(format!("embedding task failed: {error}")))?;
        per_batch[batch_no] = vectors?;
    }

    let vectors: Vec<Vec<f32>> = per_batch.into_iter().flatten().collect();
    if vectors.len() != chunks.len() {
        return Err(EmbedError::Response(format!(
            "embedded {} of {} chunks",
            vectors.len(),
            chunks.len()
        )));
    }
    Ok(vectors)
}
