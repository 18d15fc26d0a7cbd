//! ABOUTME: Tracer acquisition and feedback submission contract
//! ABOUTME: Span/trace ids flow into message metadata so feedback can address one invocation

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use weft_core::{Result, WeftError};
use weft_dsl::semantic::TelemetrySink;

use crate::secrets::SecretManager;

/// Telemetry classification of a step executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Generic,
    Llm,
    Tool,
    Retriever,
    Embedding,
    Chain,
}

impl SpanKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Retriever => "retriever",
            Self::Embedding => "embedding",
            Self::Chain => "chain",
        }
    }
}

/// Ids of one opened span. A new span is opened per `process_message`
/// invocation, not per step, so feedback is attributable to a specific
/// message output.
#[derive(Debug, Clone)]
pub struct SpanHandle {
    pub span_id: String,
    pub trace_id: String,
}

/// Tracer boundary consumed by the executor framework.
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, attributes: &[(&str, String)]) -> SpanHandle;
}

fn new_span_handle() -> SpanHandle {
    let id = Uuid::new_v4().simple().to_string();
    SpanHandle {
        span_id: id[..16].to_string(),
        trace_id: id,
    }
}

/// Default tracer bridging spans onto the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn start_span(&self, name: &str, attributes: &[(&str, String)]) -> SpanHandle {
        let handle = new_span_handle();
        debug!(
            span = name,
            span_id = %handle.span_id,
            trace_id = %handle.trace_id,
            attributes = ?attributes,
            "span opened"
        );
        handle
    }
}

/// Tracer that only mints ids, for tests and disabled telemetry.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str, _attributes: &[(&str, String)]) -> SpanHandle {
        new_span_handle()
    }
}

/// Feedback submission boundary: annotate a specific span with user feedback.
#[async_trait]
pub trait FeedbackClient: Send + Sync {
    async fn submit(
        &self,
        span_id: &str,
        trace_id: &str,
        feedback: serde_json::Value,
    ) -> Result<()>;
}

/// HTTP feedback client posting annotations to the sink endpoint.
pub struct HttpFeedbackClient {
    endpoint: String,
    http: reqwest::Client,
}

#[async_trait]
impl FeedbackClient for HttpFeedbackClient {
    async fn submit(
        &self,
        span_id: &str,
        trace_id: &str,
        feedback: serde_json::Value,
    ) -> Result<()> {
        let payload = serde_json::json!({
            "span_id": span_id,
            "trace_id": trace_id,
            "feedback": feedback,
        });
        self.http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| WeftError::Adapter {
                message: format!("feedback submission to '{}' failed", self.endpoint),
                source: Some(Box::new(e)),
            })?;
        Ok(())
    }
}

/// Create a feedback client for a telemetry sink descriptor by provider name.
pub fn create_feedback_client(
    sink: &TelemetrySink,
    _secrets: &Arc<dyn SecretManager>,
    http: reqwest::Client,
) -> Result<Arc<dyn FeedbackClient>> {
    match sink.provider.as_str() {
        "phoenix" | "arize" | "langfuse" | "http" => Ok(Arc::new(HttpFeedbackClient {
            endpoint: sink.endpoint.clone(),
            http,
        })),
        other => Err(WeftError::configuration(format!(
            "unknown telemetry provider '{other}' for sink '{}'",
            sink.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_ids_are_fresh_per_invocation() {
        let tracer = NoopTracer;
        let a = tracer.start_span("step.process", &[]);
        let b = tracer.start_span("step.process", &[]);
        assert_ne!(a.span_id, b.span_id);
        assert_eq!(a.span_id.len(), 16);
        assert_eq!(a.trace_id.len(), 32);
    }
}
