use crate::embeddings::cosine_similarity;
use crate::error::SearchError;
use crate::models::{MetadataFilter, SearchHit};
use crate::store::{ScoredRecord, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const DEFAULT_TOP_K: usize = 8;
pub const DEFAULT_FETCH_K: usize = 16;
pub const DEFAULT_MMR_LAMBDA: f32 = 0.7;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;

/// Terms shorter than this are not worth counting in the frequency table.
const MIN_TRACKED_TERM_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Similarity,
    SimilarityThreshold,
    Mmr,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrieverOptions {
    pub kind: SearchKind,
    /// Results selected per query.
    pub k: usize,
    /// Candidates fetched before MMR selection.
    pub fetch_k: usize,
    /// Relevance/diversity balance: 1 is pure relevance, 0 pure diversity.
    pub lambda: f32,
    /// Minimum similarity for [`SearchKind::SimilarityThreshold`].
    pub score_threshold: f32,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            kind: SearchKind::Mmr,
            k: DEFAULT_TOP_K,
            fetch_k: DEFAULT_FETCH_K,
            lambda: DEFAULT_MMR_LAMBDA,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// Process-lifetime search counters; reset only with the orchestrator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStats {
    pub total_searches: u64,
    pub avg_results_per_search: f64,
    pub term_frequencies: HashMap<String, u64>,
}

impl SearchStats {
    fn record(&mut self, query: &str, results: usize) {
        self.total_searches += 1;
        let searches = self.total_searches as f64;
        self.avg_results_per_search =
            (self.avg_results_per_search * (searches - 1.0) + results as f64) / searches;

        for term in query.to_lowercase().split_whitespace() {
            if term.len() > MIN_TRACKED_TERM_LEN {
                *self.term_frequencies.entry(term.to_string()).or_insert(0) += 1;
            }
        }
    }

    pub fn top_terms(&self, limit: usize) -> Vec<(String, u64)> {
        let mut terms: Vec<(String, u64)> = self
            .term_frequencies
            .iter()
            .map(|(term, count)| (term.clone(), *count))
            .collect();
        terms.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
        terms.truncate(limit);
        terms
    }
}

/// Diversity-aware retrieval over a [`VectorStore`].
pub struct Retriever {
    store: Arc<VectorStore>,
    options: RetrieverOptions,
    stats: Mutex<SearchStats>,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, options: RetrieverOptions) -> Self {
        tracing::info!(
            kind = ?options.kind,
            k = options.k,
            fetch_k = options.fetch_k,
            lambda = options.lambda,
            "retriever configured"
        );
        Self {
            store,
            options,
            stats: Mutex::new(SearchStats::default()),
        }
    }

    pub fn options(&self) -> RetrieverOptions {
        self.options
    }

    /// Run the configured search, apply the metadata filter, truncate to
    /// `max_results`. Provider failures surface as `RetrievalUnavailable`.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let embedder = self.store.embedder().await.ok_or_else(|| {
            SearchError::NotReady("embedder not initialized".to_string())
        })?;
        let query_vector = embedder.embed_query(query).await?;

        let fetch = match self.options.kind {
            SearchKind::Mmr => self.options.fetch_k.max(self.options.k),
            _ => self.options.k,
        };
        let candidates = self.store.similarity_search(&query_vector, fetch).await?;

        let selected: Vec<&ScoredRecord> = match self.options.kind {
            SearchKind::Similarity => candidates.iter().take(self.options.k).collect(),
            SearchKind::SimilarityThreshold => candidates
                .iter()
                .filter(|candidate| candidate.score >= self.options.score_threshold)
                .take(self.options.k)
                .collect(),
            SearchKind::Mmr => {
                maximal_marginal_relevance(&candidates, self.options.k, self.options.lambda)
                    .into_iter()
                    .map(|index| &candidates[index])
                    .collect()
            }
        };

        let hits: Vec<SearchHit> = selected
            .into_iter()
            .filter(|candidate| {
                filter
                    .map(|f| f.matches(&candidate.record.metadata))
                    .unwrap_or(true)
            })
            .take(max_results)
            .enumerate()
            .map(|(position, candidate)| SearchHit {
                content: candidate.record.text.clone(),
                metadata: candidate.record.metadata.clone(),
                relevance_rank: position + 1,
                score: Some(candidate.score),
                matched_keywords: Vec::new(),
            })
            .collect();

        self.record_stats(query, hits.len());
        tracing::debug!(query, results = hits.len(), "search completed");
        Ok(hits)
    }

    /// Similarity search re-ranked by required keywords: fetch twice the
    /// requested amount, keep hits whose keyword list or text contains at
    /// least one required keyword, and attach the matched subset.
    pub async fn search_by_keywords(
        &self,
        query: &str,
        required_keywords: &[String],
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let candidates = self.search(query, max_results * 2, None).await?;

        let mut filtered = Vec::new();
        for mut hit in candidates {
            let content_lower = hit.content.to_lowercase();
            let matched: Vec<String> = required_keywords
                .iter()
                .filter(|keyword| {
                    let lowered = keyword.to_lowercase();
                    hit.metadata
                        .keywords
                        .iter()
                        .any(|known| known.eq_ignore_ascii_case(keyword))
                        || content_lower.contains(&lowered)
                })
                .cloned()
                .collect();

            if !matched.is_empty() {
                hit.matched_keywords = matched;
                filtered.push(hit);
            }
            if filtered.len() >= max_results {
                break;
            }
        }

        tracing::debug!(
            query,
            required = required_keywords.len(),
            results = filtered.len(),
            "keyword search completed"
        );
        Ok(filtered)
    }

    pub fn stats(&self) -> SearchStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record_stats(&self, query: &str, results: usize) {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stats.record(query, results);
    }
}

/// Select up to `k` candidate indices balancing relevance against
/// redundancy: maximizes `lambda * relevance - (1 - lambda) * max
/// similarity to the already-selected set`. Candidates must be sorted by
/// descending relevance; ties keep the better original rank.
pub fn maximal_marginal_relevance(
    candidates: &[ScoredRecord],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::new();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_position = 0;
        let mut best_value = f32::NEG_INFINITY;

        for (position, &index) in remaining.iter().enumerate() {
            let relevance = candidates[index].score;
            let redundancy = selected
                .iter()
                .map(|&chosen| {
                    cosine_similarity(
                        &candidates[index].record.vector,
                        &candidates[chosen].record.vector,
                    )
                })
                .fold(0.0f32, f32::max);

            let value = lambda * relevance - (1.0 - lambda) * redundancy;
            if value > best_value {
                best_value = value;
                best_position = position;
            }
        }

        selected.push(remaining.remove(best_position));
    }

    selected
}

/// Render hits as a delimited knowledge block for prompt concatenation.
pub fn format_for_prompt(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut lines = Vec::new();
    lines.push("=== BEGIN KNOWLEDGE ===".to_string());

    for (position, hit) in hits.iter().enumerate() {
        let source = hit.metadata.filename.trim_end_matches(".txt");
        lines.push(format!(
            "\n--- Source {}: {} ({}) ---",
            position + 1,
            hit.metadata.document_type.display_name(),
            source
        ));

        if !hit.metadata.keywords.is_empty() {
            let shown: Vec<&str> = hit
                .metadata
                .keywords
                .iter()
                .take(5)
                .map(String::as_str)
                .collect();
            lines.push(format!("Keywords: {}", shown.join(", ")));
        }

        lines.push(hit.content.trim().to_string());
    }

    lines.push("\n=== END KNOWLEDGE ===\n".to_string());
    lines.join("\n")
}
