//! ABOUTME: Embedding adapter contract and the OpenAI-compatible HTTP implementation

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;

use weft_core::{Result, WeftError};
use weft_dsl::semantic::Model;

use crate::auth::AuthSession;

/// Vectorizes batches of text. Implementations must be task-safe; the
/// embedder executor issues one call per batch.
#[async_trait]
pub trait EmbeddingAdapter: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Declared dimensionality, for validation against the index.
    fn dimensions(&self) -> usize;
}

pub trait EmbeddingFactory: Send + Sync {
    fn adapter(
        &self,
        model: &Arc<Model>,
        auth: Option<&AuthSession>,
    ) -> Result<Arc<dyn EmbeddingAdapter>>;
}

pub struct OpenAiCompatibleEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model_id: String,
    dimensions: usize,
}

#[async_trait]
impl EmbeddingAdapter for OpenAiCompatibleEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut request = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .json(&json!({"model": self.model_id, "input": texts}));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let raw: serde_json::Value = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| WeftError::Adapter {
                message: format!("embedding model '{}' request failed", self.model_id),
                source: Some(Box::new(e)),
            })?
            .json()
            .await
            .map_err(|e| WeftError::Adapter {
                message: format!("embedding model '{}' returned malformed JSON", self.model_id),
                source: Some(Box::new(e)),
            })?;

        let data = raw
            .get("data")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                WeftError::adapter(format!(
                    "embedding model '{}' response has no data array",
                    self.model_id
                ))
            })?;
        let mut vectors = Vec::with_capacity(data.len());
        for entry in data {
            let vector = entry
                .get("embedding")
                .and_then(serde_json::Value::as_array)
                .ok_or_else(|| {
                    WeftError::adapter(format!(
                        "embedding model '{}' entry has no embedding",
                        self.model_id
                    ))
                })?
                .iter()
                .filter_map(serde_json::Value::as_f64)
                .map(|f| f as f32)
                .collect();
            vectors.push(vector);
        }
        if vectors.len() != texts.len() {
            return Err(WeftError::adapter(format!(
                "embedding model '{}' returned {} vectors for {} inputs",
                self.model_id,
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Default factory sharing the runtime HTTP client; adapters cached per
/// descriptor id and credential.
pub struct OpenAiCompatibleEmbeddingFactory {
    http: reqwest::Client,
    cache: DashMap<String, Arc<dyn EmbeddingAdapter>>,
}

impl OpenAiCompatibleEmbeddingFactory {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: DashMap::new(),
        }
    }
}

impl EmbeddingFactory for OpenAiCompatibleEmbeddingFactory {
    fn adapter(
        &self,
        model: &Arc<Model>,
        auth: Option<&AuthSession>,
    ) -> Result<Arc<dyn EmbeddingAdapter>> {
        let Some(dimensions) = model.dimensions else {
            return Err(WeftError::configuration(format!(
                "model '{}' is not an embedding model",
                model.id
            )));
        };
        let api_key = auth.and_then(|session| match session {
            AuthSession::ApiKey { api_key, .. } => Some(api_key.clone()),
            AuthSession::Bearer { token } => Some(token.clone()),
            _ => None,
        });
        let cache_key = format!("{}:{}", model.id, api_key.as_deref().unwrap_or("anonymous"));
        if let Some(existing) = self.cache.get(&cache_key) {
            return Ok(existing.clone());
        }
        let base_url = model
            .inference_params
            .get("base_url")
            .and_then(serde_json::Value::as_str)
            .map(|url| url.trim_end_matches('/').to_string())
            .or_else(|| {
                auth.and_then(|session| match session {
                    AuthSession::ApiKey {
                        host: Some(host), ..
                    } => Some(if host.contains("://") {
                        host.trim_end_matches('/').to_string()
                    } else {
                        format!("https://{}/v1", host.trim_end_matches('/'))
                    }),
                    _ => None,
                })
            })
            .ok_or_else(|| {
                WeftError::configuration(format!(
                    "embedding model '{}' has no base_url inference param and no auth host",
                    model.id
                ))
            })?;
        let adapter: Arc<dyn EmbeddingAdapter> = Arc::new(OpenAiCompatibleEmbedder {
            http: self.http.clone(),
            base_url,
            api_key,
            model_id: model.provider_model_id().to_string(),
            dimensions,
        });
        self.cache.insert(cache_key, adapter.clone());
        Ok(adapter)
    }
}
