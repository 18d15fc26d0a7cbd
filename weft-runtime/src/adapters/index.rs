//! ABOUTME: Index client boundary for vector/document search and bulk upsert
//! ABOUTME: One client per descriptor, shared across messages; requests run on the async pool

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;

use weft_core::{RagChunk, Result, SearchResult, WeftError};
use weft_dsl::semantic::Index;

/// Client contract consumed by the search and upsert executors.
#[async_trait]
pub trait IndexClient: Send + Sync {
    async fn bulk_upsert(&self, index: &Index, chunks: &[RagChunk]) -> Result<usize>;

    async fn vector_search(
        &self,
        index: &Index,
        query_vector: &[f32],
        top_k: usize,
        filters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<SearchResult>>;

    async fn document_search(
        &self,
        index: &Index,
        query: &str,
        top_k: usize,
        filters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<SearchResult>>;
}

pub trait IndexClientFactory: Send + Sync {
    fn client(&self, index: &Arc<Index>) -> Result<Arc<dyn IndexClient>>;
}

/// HTTP client speaking the OpenSearch-style `_search` / `_bulk` wire shape.
/// The endpoint comes from the index descriptor's `args.endpoint`.
pub struct HttpIndexClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpIndexClient {
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    async fn search(&self, index: &Index, body: serde_json::Value) -> Result<Vec<SearchResult>> {
        let url = format!("{}/{}/_search", self.endpoint, index.name);
        let raw: serde_json::Value = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| WeftError::Adapter {
                message: format!("search against index '{}' failed", index.id),
                source: Some(Box::new(e)),
            })?
            .json()
            .await
            .map_err(|e| WeftError::Adapter {
                message: format!("index '{}' returned malformed JSON", index.id),
                source: Some(Box::new(e)),
            })?;

        let hits = raw
            .pointer("/hits/hits")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(hits
            .iter()
            .map(|hit| SearchResult {
                content: hit
                    .pointer("/_source/content")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                doc_id: hit
                    .get("_id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: hit
                    .get("_score")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or_default(),
            })
            .collect())
    }

    fn filter_clauses(
        filters: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<serde_json::Value> {
        filters
            .iter()
            .map(|(field, value)| json!({"term": {field: value}}))
            .collect()
    }
}

#[async_trait]
impl IndexClient for HttpIndexClient {
    async fn bulk_upsert(&self, index: &Index, chunks: &[RagChunk]) -> Result<usize> {
        let mut body = String::new();
        for chunk in chunks {
            let id = format!("{}:{}", chunk.doc_id, chunk.chunk_index);
            body.push_str(&json!({"index": {"_index": index.name, "_id": id}}).to_string());
            body.push('\n');
            body.push_str(
                &json!({
                    "doc_id": chunk.doc_id,
                    "chunk_index": chunk.chunk_index,
                    "content": chunk.content,
                    "vector": chunk.vector,
                    "metadata": chunk.metadata,
                })
                .to_string(),
            );
            body.push('\n');
        }
        let url = format!("{}/_bulk", self.endpoint);
        self.http
            .post(&url)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| WeftError::Adapter {
                message: format!("bulk upsert into index '{}' failed", index.id),
                source: Some(Box::new(e)),
            })?;
        Ok(chunks.len())
    }

    async fn vector_search(
        &self,
        index: &Index,
        query_vector: &[f32],
        top_k: usize,
        filters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<SearchResult>> {
        let mut query = json!({
            "size": top_k,
            "query": {"knn": {"vector": {"vector": query_vector, "k": top_k}}},
        });
        let clauses = Self::filter_clauses(filters);
        if !clauses.is_empty() {
            query["query"] = json!({
                "bool": {
                    "must": [{"knn": {"vector": {"vector": query_vector, "k": top_k}}}],
                    "filter": clauses,
                }
            });
        }
        self.search(index, query).await
    }

    async fn document_search(
        &self,
        index: &Index,
        query: &str,
        top_k: usize,
        filters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<SearchResult>> {
        let mut body = json!({
            "size": top_k,
            "query": {"match": {"content": query}},
        });
        let clauses = Self::filter_clauses(filters);
        if !clauses.is_empty() {
            body["query"] = json!({
                "bool": {
                    "must": [{"match": {"content": query}}],
                    "filter": clauses,
                }
            });
        }
        self.search(index, body).await
    }
}

/// Default factory: one HTTP client per index descriptor, reused across
/// messages.
pub struct HttpIndexClientFactory {
    http: reqwest::Client,
    cache: DashMap<String, Arc<dyn IndexClient>>,
}

impl HttpIndexClientFactory {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: DashMap::new(),
        }
    }
}

impl IndexClientFactory for HttpIndexClientFactory {
    fn client(&self, index: &Arc<Index>) -> Result<Arc<dyn IndexClient>> {
        if let Some(existing) = self.cache.get(&index.id) {
            return Ok(existing.clone());
        }
        let endpoint = index
            .args
            .get("endpoint")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                WeftError::configuration(format!(
                    "index '{}' has no 'endpoint' in its args",
                    index.id
                ))
            })?;
        let client: Arc<dyn IndexClient> =
            Arc::new(HttpIndexClient::new(self.http.clone(), endpoint));
        self.cache.insert(index.id.clone(), client.clone());
        Ok(client)
    }
}
