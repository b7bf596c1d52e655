//! Embedding provider and ranking primitives for the meta-tools search.
//!
//! Vectors are best-effort: a missing or failed embedding leaves the tool
//! addressable by name and searchable through the substring fallback.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::EmbeddingConfig;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(String),

    #[error("embedding request timed out")]
    Timeout,

    #[error("provider error: {0}")]
    Api(String),

    #[error("unexpected response: {0}")]
    Parse(String),
}

/// Trait for computing text embeddings.
///
/// Implementations call an external service to convert text into a dense
/// vector representation.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Expected vector dimension; vectors of any other length are discarded
    /// by the caller.
    fn dim(&self) -> usize;
}

/// An embedding provider that calls an OpenAI-compatible `/v1/embeddings`
/// API.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
}

impl HttpEmbeddingProvider {
    /// Create a new HTTP embedding provider from the given configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| EmbeddingError::Http(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.resolve_api_key(),
            dim: config.dim,
        })
    }
}

/// Embeddings API request body.
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Embeddings API response.
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// A single embedding result.
#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tracing::debug!(model = %self.model, text_len = text.len(), "requesting embedding");

        let request_body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let mut request = self.client.post(&self.endpoint).json(&request_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout
            } else {
                EmbeddingError::Http(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read body".to_owned());
            return Err(EmbeddingError::Api(format!("status {status}: {body}")));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Parse("empty response data".to_owned()))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Compute the cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` if either vector has
/// zero magnitude or the vectors differ in length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut mag_a = 0.0_f32;
    let mut mag_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}

/// Fallback ranking score when no vectors are available.
///
/// Case-insensitive whitespace tokens of the query are matched as
/// substrings; a hit in the tool name scores 3, a hit in the description
/// scores 1.
pub fn substring_score(query: &str, name: &str, description: &str) -> u32 {
    let name = name.to_lowercase();
    let description = description.to_lowercase();
    let mut score = 0;
    for token in query.to_lowercase().split_whitespace() {
        if name.contains(token) {
            score += 3;
        }
        if description.contains(token) {
            score += 1;
        }
    }
    score
}

/// Stable content hash of the embedded text, used to reuse stored vectors
/// for tools whose name and description did not change across refreshes.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
