//! ABOUTME: Language model adapter contract and the OpenAI-compatible HTTP implementation
//! ABOUTME: Adapters are cached per descriptor id and credential fingerprint

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tracing::debug;

use weft_core::{ChatMessage, ChatRole, Result, WeftError};
use weft_dsl::semantic::Model;

use crate::auth::AuthSession;

/// A single tool the model may call, in provider-neutral schema form.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Incremental output surfaced during streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    Text(String),
    Reasoning(String),
}

pub type DeltaCallback<'a> = &'a (dyn Fn(ChatDelta) + Send + Sync);

/// The adapter contract consumed by the LLM and agent executors. SDK
/// specifics stay behind this boundary.
#[async_trait]
pub trait LanguageModelAdapter: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<CompletionResponse>;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ChatResponse>;

    /// Stream a chat response, invoking the callback per delta. The default
    /// implementation falls back to one terminal delta.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &serde_json::Map<String, serde_json::Value>,
        on_delta: DeltaCallback<'_>,
    ) -> Result<ChatResponse> {
        let response = self.chat(messages, tools, params).await?;
        if let Some(reasoning) = &response.reasoning {
            on_delta(ChatDelta::Reasoning(reasoning.clone()));
        }
        on_delta(ChatDelta::Text(response.message.text()));
        Ok(response)
    }
}

/// Creates adapters from model descriptors.
pub trait LanguageModelFactory: Send + Sync {
    fn adapter(
        &self,
        model: &Arc<Model>,
        auth: Option<&AuthSession>,
    ) -> Result<Arc<dyn LanguageModelAdapter>>;
}

fn role_token(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

/// OpenAI-compatible chat/completions adapter over HTTP.
pub struct OpenAiCompatibleAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model_id: String,
}

impl OpenAiCompatibleAdapter {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
            model_id: model_id.into(),
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let response = self
            .request(path)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| WeftError::Adapter {
                message: format!("model '{}' request failed", self.model_id),
                source: Some(Box::new(e)),
            })?;
        response.json().await.map_err(|e| WeftError::Adapter {
            message: format!("model '{}' returned malformed JSON", self.model_id),
            source: Some(Box::new(e)),
        })
    }

    fn chat_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> serde_json::Value {
        let rendered: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({"role": role_token(m.role), "content": m.text()}))
            .collect();
        let mut body = json!({
            "model": self.model_id,
            "messages": rendered,
        });
        if !tools.is_empty() {
            let rendered_tools: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(rendered_tools);
        }
        for (key, value) in params {
            body[key] = value.clone();
        }
        body
    }

    fn parse_chat(&self, raw: &serde_json::Value) -> Result<ChatResponse> {
        let choice = raw
            .pointer("/choices/0/message")
            .ok_or_else(|| WeftError::adapter(format!("model '{}' returned no choices", self.model_id)))?;
        let content = choice
            .get("content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let reasoning = choice
            .get("reasoning_content")
            .and_then(serde_json::Value::as_str)
            .map(String::from);
        let tool_calls = choice
            .get("tool_calls")
            .and_then(serde_json::Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let call_id = call.get("id")?.as_str()?.to_string();
                        let function = call.get("function")?;
                        let tool_name = function.get("name")?.as_str()?.to_string();
                        let arguments = function
                            .get("arguments")
                            .and_then(serde_json::Value::as_str)
                            .and_then(|raw| serde_json::from_str(raw).ok())
                            .unwrap_or_else(|| json!({}));
                        Some(ToolCallRequest {
                            call_id,
                            tool_name,
                            arguments,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ChatResponse {
            message: ChatMessage::new(ChatRole::Assistant, content),
            reasoning,
            tool_calls,
        })
    }
}

#[async_trait]
impl LanguageModelAdapter for OpenAiCompatibleAdapter {
    async fn complete(
        &self,
        prompt: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<CompletionResponse> {
        // Completion requests reuse the chat endpoint; single-turn prompt.
        let messages = [ChatMessage::new(ChatRole::User, prompt)];
        let response = self.chat(&messages, &[], params).await?;
        Ok(CompletionResponse {
            text: response.message.text(),
            reasoning: response.reasoning,
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ChatResponse> {
        let body = self.chat_body(messages, tools, params);
        debug!(model = %self.model_id, "chat request");
        let raw = self.post_json("/chat/completions", body).await?;
        self.parse_chat(&raw)
    }
}

/// Default factory: every provider is reached through an OpenAI-compatible
/// endpoint. The base URL comes from `inference_params.base_url` or the auth
/// host; the api key from the resolved auth session.
pub struct OpenAiCompatibleFactory {
    http: reqwest::Client,
    cache: DashMap<String, Arc<dyn LanguageModelAdapter>>,
}

impl OpenAiCompatibleFactory {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: DashMap::new(),
        }
    }

    fn base_url(model: &Model, auth: Option<&AuthSession>) -> Result<String> {
        if let Some(url) = model
            .inference_params
            .get("base_url")
            .and_then(serde_json::Value::as_str)
        {
            return Ok(url.trim_end_matches('/').to_string());
        }
        if let Some(AuthSession::ApiKey {
            host: Some(host), ..
        }) = auth
        {
            let host = host.trim_end_matches('/');
            return Ok(if host.contains("://") {
                host.to_string()
            } else {
                format!("https://{host}/v1")
            });
        }
        Err(WeftError::configuration(format!(
            "model '{}' (provider '{}') has no base_url inference param and no auth host",
            model.id, model.provider
        )))
    }
}

impl LanguageModelFactory for OpenAiCompatibleFactory {
    fn adapter(
        &self,
        model: &Arc<Model>,
        auth: Option<&AuthSession>,
    ) -> Result<Arc<dyn LanguageModelAdapter>> {
        let api_key = auth.and_then(|session| match session {
            AuthSession::ApiKey { api_key, .. } => Some(api_key.clone()),
            AuthSession::Bearer { token } => Some(token.clone()),
            _ => None,
        });
        let cache_key = format!(
            "{}:{}",
            model.id,
            api_key.as_deref().unwrap_or("anonymous")
        );
        if let Some(existing) = self.cache.get(&cache_key) {
            return Ok(existing.clone());
        }
        let base_url = Self::base_url(model, auth)?;
        let adapter: Arc<dyn LanguageModelAdapter> = Arc::new(OpenAiCompatibleAdapter::new(
            self.http.clone(),
            base_url,
            api_key,
            model.provider_model_id().to_string(),
        ));
        self.cache.insert(cache_key, adapter.clone());
        Ok(adapter)
    }
}
