use crate::chunking::split_documents;
use crate::config::KnowledgeConfig;
use crate::error::{IndexError, SearchError};
use crate::ingest::load_all_documents;
use crate::models::{DocumentType, MetadataFilter, RetrievalOutcome, SearchHit};
use crate::retriever::{format_for_prompt, Retriever, SearchStats};
use crate::store::{IndexStats, VectorStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

const HEALTH_PROBE_QUERY: &str = "risk assessment";
const LAST_SEARCH_QUERY_PREFIX: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub initialized: bool,
    pub docs_accessible: bool,
    pub snapshot_loaded: bool,
    pub retriever_bound: bool,
    pub embedder_configured: bool,
}

impl ComponentHealth {
    fn all_up(&self) -> bool {
        self.initialized
            && self.docs_accessible
            && self.snapshot_loaded
            && self.retriever_bound
            && self.embedder_configured
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub components: ComponentHealth,
    pub probe_returned_results: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastSearch {
    pub query: String,
    pub results: usize,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStats {
    pub documents_loaded: usize,
    pub chunks_created: usize,
    pub initialization_secs: Option<f64>,
    pub retrieval_calls: u64,
    pub last_search: Option<LastSearch>,
}

/// Merged, read-only view across orchestrator, index, and retriever.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub lifecycle: Lifecycle,
    pub docs_dir: String,
    pub persist_directory: String,
    pub orchestrator: OrchestratorStats,
    pub index: IndexStats,
    pub retriever: Option<SearchStats>,
}

/// Owns the ingestor, vector index, and retriever, and walks them through
/// a strict lifecycle: embedder first, snapshot loaded or rebuilt second,
/// retriever bound last. Construct one per host and share it by reference;
/// every method takes `&self`.
pub struct KnowledgeOrchestrator {
    config: KnowledgeConfig,
    store: Arc<VectorStore>,
    retriever: RwLock<Option<Arc<Retriever>>>,
    lifecycle: RwLock<Lifecycle>,
    stats: Mutex<OrchestratorStats>,
}

impl KnowledgeOrchestrator {
    pub fn new(config: KnowledgeConfig) -> Self {
        let store = Arc::new(VectorStore::new(
            config.persist_dir.clone(),
            config.collection.clone(),
        ));
        Self {
            config,
            store,
            retriever: RwLock::new(None),
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            stats: Mutex::new(OrchestratorStats::default()),
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().await
    }

    /// Bring the knowledge base up. On any failure the orchestrator drops
    /// back to `Uninitialized` and returns the underlying error; a partially
    /// initialized state is never observable.
    pub async fn initialize(&self) -> Result<(), IndexError> {
        *self.lifecycle.write().await = Lifecycle::Initializing;
        let started = Utc::now();

        match self.initialize_inner().await {
            Ok(()) => {
                let elapsed = (Utc::now() - started).num_milliseconds() as f64 / 1000.0;
                self.with_stats(|stats| stats.initialization_secs = Some(elapsed));
                *self.lifecycle.write().await = Lifecycle::Ready;
                tracing::info!(elapsed_secs = elapsed, "knowledge base ready");
                Ok(())
            }
            Err(error) => {
                *self.retriever.write().await = None;
                *self.lifecycle.write().await = Lifecycle::Uninitialized;
                tracing::error!(%error, "knowledge base initialization failed");
                Err(error)
            }
        }
    }

    async fn initialize_inner(&self) -> Result<(), IndexError> {
        if self.store.embedder().await.is_none() {
            self.store
                .initialize_embedder(self.config.api_key.as_deref(), self.config.embedding.clone())
                .await?;
        }

        let loaded = self.store.load().await;
        if loaded.is_none() || self.store.should_rebuild(&self.config.docs_dir).await {
            tracing::info!(docs_dir = %self.config.docs_dir.display(), "building vector index");

            let documents = load_all_documents(&self.config.docs_dir)?;
            let chunks = split_documents(&documents, self.config.chunking)?;
            self.with_stats(|stats| {
                stats.documents_loaded = documents.len();
                stats.chunks_created = chunks.len();
            });

            self.store.build(&chunks).await?;
        } else {
            let resident = self.store.record_count().await;
            self.with_stats(|stats| stats.chunks_created = resident);
            tracing::info!(records = resident, "vector index reused from snapshot");
        }

        let retriever = Retriever::new(Arc::clone(&self.store), self.config.retriever);
        *self.retriever.write().await = Some(Arc::new(retriever));
        Ok(())
    }

    async fn bound_retriever(&self) -> Result<Arc<Retriever>, SearchError> {
        let lifecycle = self.lifecycle().await;
        if !matches!(lifecycle, Lifecycle::Ready | Lifecycle::Degraded) {
            return Err(SearchError::NotReady(format!(
                "knowledge base is {lifecycle:?}"
            )));
        }

        self.retriever
            .read()
            .await
            .clone()
            .ok_or_else(|| SearchError::NotReady("retriever not bound".to_string()))
    }

    /// Search the knowledge base. `Err(NotReady)` before initialization;
    /// a provider failure yields `Ok(Degraded)` so the caller can continue
    /// without context.
    pub async fn search_relevant_context(
        &self,
        query: &str,
        max_chunks: usize,
        document_types: Option<&[DocumentType]>,
    ) -> Result<RetrievalOutcome, SearchError> {
        let retriever = self.bound_retriever().await?;
        let filter = document_types.map(MetadataFilter::document_types);

        match retriever.search(query, max_chunks, filter.as_ref()).await {
            Ok(hits) => {
                self.note_search(query, hits.len());
                Ok(RetrievalOutcome::Results { hits })
            }
            Err(SearchError::RetrievalUnavailable(reason)) => {
                tracing::warn!(query, %reason, "retrieval degraded, continuing without context");
                Ok(RetrievalOutcome::Degraded { reason })
            }
            Err(other) => Err(other),
        }
    }

    /// Search scoped to one methodology by its characteristic vocabulary.
    pub async fn search_by_methodology(
        &self,
        query: &str,
        methodology: &str,
        max_results: usize,
    ) -> Result<RetrievalOutcome, SearchError> {
        let retriever = self.bound_retriever().await?;

        let keywords: Vec<String> = match methodology.to_uppercase().as_str() {
            "MAGERIT" => vec!["magerit", "asset", "threat", "vulnerability", "impact", "risk"],
            "OCTAVE" => vec!["octave", "asset", "threat", "vulnerability"],
            "ISO27001" => vec!["iso", "27001", "isms", "control", "annex"],
            "NIST" => vec!["nist", "framework", "cybersecurity", "function"],
            _ => vec![],
        }
        .into_iter()
        .map(str::to_string)
        .collect();
        let keywords = if keywords.is_empty() {
            vec![methodology.to_lowercase()]
        } else {
            keywords
        };

        let enhanced = format!("{query} {methodology}");
        match retriever
            .search_by_keywords(&enhanced, &keywords, max_results)
            .await
        {
            Ok(hits) => {
                self.note_search(&enhanced, hits.len());
                Ok(RetrievalOutcome::Results { hits })
            }
            Err(SearchError::RetrievalUnavailable(reason)) => {
                tracing::warn!(query, methodology, %reason, "methodology search degraded");
                Ok(RetrievalOutcome::Degraded { reason })
            }
            Err(other) => Err(other),
        }
    }

    /// Document types present in the index; empty before initialization.
    pub async fn available_document_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .store
            .stats()
            .await
            .document_types
            .into_keys()
            .collect();
        types.sort_unstable();
        types
    }

    pub fn format_context_for_prompt(&self, hits: &[SearchHit]) -> String {
        format_for_prompt(hits)
    }

    /// Check every component and run one live probe query. A degraded
    /// check moves a Ready orchestrator to Degraded; Unhealthy is reserved
    /// for the check itself failing.
    pub async fn health_check(&self) -> HealthReport {
        let lifecycle = self.lifecycle().await;
        let components = ComponentHealth {
            initialized: matches!(lifecycle, Lifecycle::Ready | Lifecycle::Degraded),
            docs_accessible: self.config.docs_dir.is_dir(),
            snapshot_loaded: self.store.is_loaded().await,
            retriever_bound: self.retriever.read().await.is_some(),
            embedder_configured: self.store.embedder().await.is_some(),
        };

        let retriever = self.retriever.read().await.clone();
        let (probe_returned_results, check_failed) = match retriever {
            Some(retriever) if components.initialized => {
                match retriever.search(HEALTH_PROBE_QUERY, 1, None).await {
                    Ok(hits) => (!hits.is_empty(), false),
                    Err(SearchError::RetrievalUnavailable(reason)) => {
                        tracing::warn!(%reason, "health probe could not reach the provider");
                        (false, false)
                    }
                    // NotReady with a resident snapshot means the check
                    // itself hit an inconsistent internal state.
                    Err(SearchError::NotReady(reason)) => {
                        if components.snapshot_loaded {
                            tracing::error!(%reason, "health probe hit inconsistent state");
                            (false, true)
                        } else {
                            (false, false)
                        }
                    }
                }
            }
            _ => (false, false),
        };

        let status = if check_failed {
            HealthStatus::Unhealthy
        } else if components.all_up() && probe_returned_results {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        if status != HealthStatus::Healthy && lifecycle == Lifecycle::Ready {
            *self.lifecycle.write().await = Lifecycle::Degraded;
            tracing::warn!(?status, "health check demoted knowledge base");
        }

        HealthReport {
            status,
            checked_at: Utc::now(),
            components,
            probe_returned_results,
        }
    }

    pub async fn get_stats(&self) -> KnowledgeStats {
        let retriever = self.retriever.read().await.clone();
        KnowledgeStats {
            lifecycle: self.lifecycle().await,
            docs_dir: self.config.docs_dir.display().to_string(),
            persist_directory: self.config.persist_dir.display().to_string(),
            orchestrator: self
                .stats
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            index: self.store.stats().await,
            retriever: retriever.map(|r| r.stats()),
        }
    }

    /// Tear everything down: purge the snapshot, unbind the retriever,
    /// reset counters, return to `Uninitialized`.
    pub async fn cleanup(&self) -> Result<(), IndexError> {
        self.store.purge().await?;
        *self.retriever.write().await = None;
        *self.lifecycle.write().await = Lifecycle::Uninitialized;
        self.with_stats(|stats| *stats = OrchestratorStats::default());
        tracing::info!("knowledge base cleaned up");
        Ok(())
    }

    pub async fn reinitialize(&self, force_reindex: bool) -> Result<(), IndexError> {
        if force_reindex {
            self.cleanup().await?;
        }
        self.initialize().await
    }

    fn note_search(&self, query: &str, results: usize) {
        self.with_stats(|stats| {
            stats.retrieval_calls += 1;
            stats.last_search = Some(LastSearch {
                query: query.chars().take(LAST_SEARCH_QUERY_PREFIX).collect(),
                results,
                at: Utc::now(),
            });
        });
    }

    fn with_stats(&self, apply: impl FnOnce(&mut OrchestratorStats)) {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingOptions;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::error::EmbedError;
    use crate::retriever::{RetrieverOptions, SearchKind};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    /// Embedder that fails every call, for degradation paths.
    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimensions(&self) -> usize {
            4
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Response("provider unreachable".to_string()))
        }
    }

    fn write_corpus(dir: &Path) {
        std::fs::write(
            dir.join("magerit_method.txt"),
            "MAGERIT risk analysis walks through assets, threats, \
             vulnerabilities, impact and safeguards in that order.",
        )
        .unwrap();
        std::fs::write(
            dir.join("principles.txt"),
            "Security principles: confidentiality, integrity and availability \
             guide every control decision.",
        )
        .unwrap();
        std::fs::write(
            dir.join("it_risk.txt"),
            "IT risk management requires periodic risk assessment and \
             continuous monitoring of vulnerability exposure.",
        )
        .unwrap();
    }

    fn test_config(docs: &TempDir, persist: &TempDir) -> KnowledgeConfig {
        KnowledgeConfig {
            retriever: RetrieverOptions {
                kind: SearchKind::Similarity,
                k: 8,
                fetch_k: 16,
                lambda: 0.7,
                score_threshold: 0.0,
            },
            chunking: ChunkingOptions::default(),
            ..KnowledgeConfig::default()
        }
        .with_dirs(docs.path(), persist.path())
    }

    async fn ready_orchestrator() -> (TempDir, TempDir, KnowledgeOrchestrator) {
        let docs = tempdir().unwrap();
        let persist = tempdir().unwrap();
        write_corpus(docs.path());

        let orchestrator = KnowledgeOrchestrator::new(test_config(&docs, &persist));
        orchestrator
            .store()
            .set_embedder(Arc::new(CharacterNgramEmbedder::default()))
            .await;
        orchestrator.initialize().await.unwrap();
        (docs, persist, orchestrator)
    }

    #[tokio::test]
    async fn search_before_initialize_is_not_ready() {
        let docs = tempdir().unwrap();
        let persist = tempdir().unwrap();
        let orchestrator = KnowledgeOrchestrator::new(test_config(&docs, &persist));

        let result = orchestrator
            .search_relevant_context("risk", 3, None)
            .await;
        assert!(matches!(result, Err(SearchError::NotReady(_))));
    }

    #[tokio::test]
    async fn initialize_without_credential_fails_uninitialized() {
        let docs = tempdir().unwrap();
        let persist = tempdir().unwrap();
        write_corpus(docs.path());

        let orchestrator = KnowledgeOrchestrator::new(test_config(&docs, &persist));
        let result = orchestrator.initialize().await;

        assert!(matches!(result, Err(IndexError::MissingCredential(_))));
        assert_eq!(orchestrator.lifecycle().await, Lifecycle::Uninitialized);
    }

    #[tokio::test]
    async fn initialize_with_missing_docs_dir_fails_uninitialized() {
        let docs = tempdir().unwrap();
        let persist = tempdir().unwrap();
        let missing = docs.path().join("nope");

        let config = test_config(&docs, &persist).with_dirs(missing, persist.path());
        let orchestrator = KnowledgeOrchestrator::new(config);
        orchestrator
            .store()
            .set_embedder(Arc::new(CharacterNgramEmbedder::default()))
            .await;

        let result = orchestrator.initialize().await;
        assert!(matches!(
            result,
            Err(IndexError::Ingest(crate::error::IngestError::DocsDirNotFound(_)))
        ));
        assert_eq!(orchestrator.lifecycle().await, Lifecycle::Uninitialized);
    }

    #[tokio::test]
    async fn initialize_builds_and_serves_ranked_context() {
        let (_docs, _persist, orchestrator) = ready_orchestrator().await;
        assert_eq!(orchestrator.lifecycle().await, Lifecycle::Ready);

        let outcome = orchestrator
            .search_relevant_context("vulnerability exposure assessment", 2, None)
            .await
            .unwrap();

        assert!(!outcome.is_degraded());
        let hits = outcome.hits();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].relevance_rank, 1);
        assert_eq!(hits[1].relevance_rank, 2);

        let stats = orchestrator.get_stats().await;
        assert_eq!(stats.orchestrator.documents_loaded, 3);
        assert_eq!(stats.orchestrator.retrieval_calls, 1);
        assert!(stats.orchestrator.last_search.is_some());
        assert!(stats.index.record_count >= 3);
    }

    #[tokio::test]
    async fn second_initialize_reuses_snapshot() {
        let docs = tempdir().unwrap();
        let persist = tempdir().unwrap();
        write_corpus(docs.path());

        let first = KnowledgeOrchestrator::new(test_config(&docs, &persist));
        first
            .store()
            .set_embedder(Arc::new(CharacterNgramEmbedder::default()))
            .await;
        first.initialize().await.unwrap();
        let built = first.get_stats().await.index.record_count;

        let second = KnowledgeOrchestrator::new(test_config(&docs, &persist));
        second
            .store()
            .set_embedder(Arc::new(CharacterNgramEmbedder::default()))
            .await;
        second.initialize().await.unwrap();

        let stats = second.get_stats().await;
        // Reuse path: no documents were loaded, the records came from disk.
        assert_eq!(stats.orchestrator.documents_loaded, 0);
        assert_eq!(stats.index.record_count, built);
    }

    #[tokio::test]
    async fn document_type_filter_narrows_results() {
        let (_docs, _persist, orchestrator) = ready_orchestrator().await;

        let outcome = orchestrator
            .search_relevant_context(
                "core security principles",
                3,
                Some(&[DocumentType::SecurityPrinciples]),
            )
            .await
            .unwrap();

        let hits = outcome.hits();
        assert!(!hits.is_empty());
        assert!(hits
            .iter()
            .all(|hit| hit.metadata.document_type == DocumentType::SecurityPrinciples));
    }

    #[tokio::test]
    async fn methodology_search_matches_vocabulary() {
        let (_docs, _persist, orchestrator) = ready_orchestrator().await;

        let outcome = orchestrator
            .search_by_methodology("risk analysis", "MAGERIT", 3)
            .await
            .unwrap();

        let hits = outcome.hits();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|hit| !hit.matched_keywords.is_empty()));
    }

    #[tokio::test]
    async fn provider_failure_degrades_instead_of_erroring() {
        let (_docs, _persist, orchestrator) = ready_orchestrator().await;

        // Swap in a failing provider after the index is built.
        orchestrator
            .store()
            .set_embedder(Arc::new(FailingEmbedder))
            .await;

        let outcome = orchestrator
            .search_relevant_context("risk", 2, None)
            .await
            .unwrap();
        assert!(outcome.is_degraded());
        assert!(outcome.hits().is_empty());
    }

    #[tokio::test]
    async fn health_is_healthy_then_degrades_when_snapshot_vanishes() {
        let (_docs, _persist, orchestrator) = ready_orchestrator().await;

        let report = orchestrator.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.probe_returned_results);

        // Remove the durable snapshot and the resident copy out-of-band.
        orchestrator.store().purge().await.unwrap();

        let report = orchestrator.health_check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(!report.components.snapshot_loaded);
        assert_eq!(orchestrator.lifecycle().await, Lifecycle::Degraded);
    }

    #[tokio::test]
    async fn cleanup_resets_state_and_statistics() {
        let (_docs, _persist, orchestrator) = ready_orchestrator().await;
        orchestrator
            .search_relevant_context("risk", 1, None)
            .await
            .unwrap();

        orchestrator.cleanup().await.unwrap();

        assert_eq!(orchestrator.lifecycle().await, Lifecycle::Uninitialized);
        let stats = orchestrator.get_stats().await;
        assert_eq!(stats.orchestrator.retrieval_calls, 0);
        assert_eq!(stats.index.record_count, 0);
        assert!(stats.retriever.is_none());

        let result = orchestrator.search_relevant_context("risk", 1, None).await;
        assert!(matches!(result, Err(SearchError::NotReady(_))));
    }

    #[tokio::test]
    async fn reinitialize_after_cleanup_rebuilds() {
        let (_docs, _persist, orchestrator) = ready_orchestrator().await;
        orchestrator.reinitialize(true).await.unwrap();

        assert_eq!(orchestrator.lifecycle().await, Lifecycle::Ready);
        let outcome = orchestrator
            .search_relevant_context("risk assessment", 1, None)
            .await
            .unwrap();
        assert_eq!(outcome.hits().len(), 1);
    }

    #[tokio::test]
    async fn fifteen_hundred_char_corpus_builds_and_searches_end_to_end() {
        let docs = tempdir().unwrap();
        let persist = tempdir().unwrap();

        // Three documents of exactly 1500 chars, built from 75-char
        // sentences: the 1000/200 splitter yields two chunks per document.
        let sentence = {
            let mut s = String::from("vulnerability threat exposure of assets");
            while s.chars().count() < 73 {
                s.push('a');
            }
            s.push_str(". ");
            s
        };
        for name in ["risk_a.txt", "risk_b.txt", "risk_c.txt"] {
            std::fs::write(docs.path().join(name), sentence.repeat(20)).unwrap();
        }

        let orchestrator = KnowledgeOrchestrator::new(test_config(&docs, &persist));
        orchestrator
            .store()
            .set_embedder(Arc::new(CharacterNgramEmbedder::default()))
            .await;
        orchestrator.initialize().await.unwrap();

        let stats = orchestrator.get_stats().await;
        assert_eq!(stats.orchestrator.documents_loaded, 3);
        assert_eq!(stats.index.record_count, 6);

        let outcome = orchestrator
            .search_relevant_context("vulnerability", 2, None)
            .await
            .unwrap();
        let hits = outcome.hits();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score.unwrap() >= hits[1].score.unwrap());
        assert_eq!(hits[0].relevance_rank, 1);
        assert_eq!(hits[1].relevance_rank, 2);
    }

    #[tokio::test]
    async fn available_document_types_lists_index_contents() {
        let (_docs, _persist, orchestrator) = ready_orchestrator().await;
        let types = orchestrator.available_document_types().await;

        assert!(types.contains(&"risk_methodology".to_string()));
        assert!(types.contains(&"security_principles".to_string()));
        assert!(types.contains(&"it_risk_management".to_string()));
    }
}
