use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use secmap_core::{EmbeddingProvider, HashEmbedder, HashEmbedderConfig, LocatorError};

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider selection from the environment.
///
/// `EMBEDDING_PROVIDER=openai` builds an [`OpenAiEmbedder`] from `EMBEDDING_MODEL`,
/// `OPENAI_API_KEY` and `OPENAI_BASE_URL`; anything else yields the offline
/// [`HashEmbedder`] sized by `HASH_EMBED_DIMENSIONS`.
pub fn provider_from_env() -> Result<Arc<dyn EmbeddingProvider>> {
    let name = env::var("EMBEDDING_PROVIDER")
        .unwrap_or_else(|_| "hash".to_string())
        .to_lowercase();
    match name.as_str() {
        "openai" => {
            let model = env::var("EMBEDDING_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
            Ok(Arc::new(OpenAiEmbedder::from_env(&model)?))
        }
        _ => {
            let dimensions = env::var("HASH_EMBED_DIMENSIONS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(HashEmbedderConfig::default().dimensions);
            Ok(Arc::new(HashEmbedder::new(HashEmbedderConfig {
                dimensions,
                ..HashEmbedderConfig::default()
            })))
        }
    }
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    http: Client,
    model: String,
    api_key: String,
    base_url: String,
    max_retries: usize,
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            max_retries: 2,
        }
    }

    pub fn from_env(model: &str) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY is required for openai embeddings"))?;
        let base_url = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(model, api_key, base_url))
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint();
        let payload = json!({
            "model": self.model,
            "input": inputs,
        });
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > self.max_retries {
                        return Err(err).context("embedding request failed");
                    }
                    warn!(attempt, error = %err, "embedding request failed, retrying");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.max_retries {
                    return Err(anyhow!(
                        "embedding endpoint rate limited after {} retries",
                        self.max_retries
                    ));
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                debug!(attempt, wait_ms = wait.as_millis() as u64, "embedding endpoint rate limited");
                sleep(wait).await;
                continue;
            }
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(anyhow!("embeddings returned error (status {status}): {body}"));
            }
            let mut parsed: EmbeddingResponse =
                serde_json::from_str(&body).context("failed to decode embeddings response")?;
            parsed.data.sort_by_key(|d| d.index);
            if parsed.data.len() != inputs.len() {
                return Err(anyhow!(
                    "expected {} embeddings, got {}",
                    inputs.len(),
                    parsed.data.len()
                ));
            }
            return Ok(parsed.data.into_iter().map(|d| d.embedding).collect());
        }
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, secmap_core::Result<Vec<f32>>> {
        Box::pin(async move {
            let inputs = [text.to_string()];
            let mut vectors = self
                .embed_batch(&inputs)
                .await
                .map_err(|err| LocatorError::Embedding(format!("{err:#}")))?;
            vectors
                .pop()
                .ok_or_else(|| LocatorError::Embedding("empty embeddings response".to_string()))
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|value| value.to_str().ok())
        .and_then(|text| text.parse::<u64>().ok())
    {
        return Duration::from_secs(secs.max(1));
    }
    Duration::from_millis(250u64 << attempt.min(4))
}
