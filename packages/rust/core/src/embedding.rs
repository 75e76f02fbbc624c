//! Embedding adapter: the [`Embedder`] seam and the OpenAI implementation.
//!
//! # Retry strategy
//!
//! - HTTP 429 and 5xx: retry with exponential backoff
//! - Network errors: retry
//! - Other HTTP 4xx: fail immediately

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use sitekb_shared::{LlmConfig, Result, SiteKbError};

/// Turns texts into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model tag stored next to every vector.
    fn model_name(&self) -> &str;

    /// Length of every returned vector.
    fn dims(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

const MAX_RETRIES: u32 = 3;

/// Calls `POST {base_url}/embeddings`.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    backoff_base: Duration,
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

impl OpenAiEmbedder {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SiteKbError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.embedding_model.clone(),
            dims: config.embedding_dim,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay. Later delays double.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    #[instrument(skip_all, fields(model = %self.model, count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<String> = texts.iter().map(|t| t.replace('\n', " ")).collect();
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
            "dimensions": self.dims,
        });

        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = self.backoff_base.saturating_mul(1 << (attempt - 1));
                debug!(attempt, delay_ms = delay.as_millis(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, attempt, "embedding request failed");
                    last_err = Some(SiteKbError::Embedding(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let parsed: EmbeddingResponse = response
                    .json()
                    .await
                    .map_err(|e| SiteKbError::Embedding(format!("invalid response: {e}")))?;
                return order_embeddings(parsed, texts.len());
            }

            let body_text = response.text().await.unwrap_or_default();
            let err = SiteKbError::Embedding(format!("API error {status}: {body_text}"));
            if status.as_u16() == 429 || status.is_server_error() {
                warn!(%status, attempt, "embedding API unavailable");
                last_err = Some(err);
                continue;
            }
            return Err(err);
        }

        Err(last_err
            .unwrap_or_else(|| SiteKbError::Embedding("embedding failed after retries".into())))
    }
}

/// Sort response items by `index` and check there is exactly one per input.
fn order_embeddings(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(SiteKbError::Embedding(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    if data.iter().enumerate().any(|(i, d)| d.index != i) {
        return Err(SiteKbError::Embedding(
            "embedding indices do not match inputs".into(),
        ));
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}
