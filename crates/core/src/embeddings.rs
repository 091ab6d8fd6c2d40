use crate::error::EmbedError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_SHIFT: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingOptions {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EMBEDDING_BASE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Text-to-vector seam between the index and an embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Preferred batch size for bulk embedding; callers may split larger
    /// inputs across concurrent calls at this granularity.
    fn batch_size(&self) -> usize {
        DEFAULT_BATCH_SIZE
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let input = [text.to_string()];
        let mut vectors = self.embed_batch(&input).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Response("empty embedding response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Remote embedding provider speaking the OpenAI embeddings API.
///
/// Batches inputs, retries 429/5xx/network failures with exponential
/// backoff, and fails fast on other client errors. Every request carries
/// the configured timeout.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    options: EmbeddingOptions,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, options: EmbeddingOptions) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            options,
            api_key: api_key.into(),
        })
    }

    async fn request_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let url = format!(
            "{}/embeddings",
            self.options.base_url.trim_end_matches('/')
        );

        let mut attempt: u32 = 0;
        loop {
            let outcome = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&EmbeddingRequest {
                    model: &self.options.model,
                    input: batch,
                })
                .send()
                .await;

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return self.decode_batch(response, batch.len()).await;
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt >= self.options.max_retries {
                        let details = response.text().await.unwrap_or_default();
                        return Err(EmbedError::Provider {
                            status: status.as_u16(),
                            details,
                        });
                    }
                }
                Err(error) => {
                    if attempt >= self.options.max_retries {
                        return Err(EmbedError::Http(error));
                    }
                }
            }

            attempt += 1;
            let backoff = Duration::from_millis(
                INITIAL_BACKOFF_MS << (attempt - 1).min(MAX_BACKOFF_SHIFT),
            );
            tracing::debug!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying embedding request");
            tokio::time::sleep(backoff).await;
        }
    }

    async fn decode_batch(
        &self,
        response: reqwest::Response,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != expected {
            return Err(EmbedError::Response(format!(
                "provider returned {} vectors for {} inputs",
                parsed.data.len(),
                expected
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|datum| datum.index);

        for datum in &data {
            if datum.embedding.len() != self.options.dimensions {
                return Err(EmbedError::Dimensions {
                    got: datum.embedding.len(),
                    want: self.options.dimensions,
                });
            }
        }

        Ok(data.into_iter().map(|datum| datum.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.options.model
    }

    fn dimensions(&self) -> usize {
        self.options.dimensions
    }

    fn batch_size(&self) -> usize {
        self.options.batch_size.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size()) {
            vectors.extend(self.request_batch(batch).await?);
        }
        Ok(vectors)
    }
}

/// Deterministic local embedder hashing character trigrams into a fixed
/// number of buckets. No network, stable across runs; the offline stand-in
/// for environments without a provider credential and for tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

pub const NGRAM_EMBEDDING_DIMENSIONS: usize = 256;

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: NGRAM_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "character-ngram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Cosine similarity between two vectors; zero for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ngram_embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder
            .embed_batch(&["risk assessment under magerit".to_string()])
            .await
            .unwrap();
        let second = embedder
            .embed_batch(&["risk assessment under magerit".to_string()])
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn ngram_embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed_query("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn similar_texts_score_higher_than_unrelated() {
        let embedder = CharacterNgramEmbedder::default();
        let base = embedder.embed_text("vulnerability assessment of assets");
        let close = embedder.embed_text("vulnerability assessment for assets");
        let far = embedder.embed_text("quarterly budget travel expenses");

        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn embedding_response_decodes_out_of_order_indices() {
        let raw = r#"{"data":[{"index":1,"embedding":[0.5,0.5]},{"index":0,"embedding":[1.0,0.0]}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|datum| datum.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
        assert_eq!(parsed.data[1].embedding, vec![0.5, 0.5]);
    }
}
