//! ABOUTME: Typed stream events emitted by executors during flow execution
//! ABOUTME: Convertible to UI-facing wire chunks by the runtime's stream converter

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A typed observation of a step's internal progress.
///
/// Every event names its originating step and carries a metadata bag; the
/// metadata typically holds `span_id` / `trace_id` so a UI or feedback API
/// can address the exact invocation that produced the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub payload: StreamEventPayload,
}

impl StreamEvent {
    pub fn new(step_id: impl Into<String>, payload: StreamEventPayload) -> Self {
        Self {
            step_id: step_id.into(),
            metadata: HashMap::new(),
            payload,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The event variants.
///
/// Incremental text and reasoning streams are bracketed by start/end events
/// sharing a `stream_id`; a delta must carry the id of its enclosing stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventPayload {
    TextStreamStart {
        stream_id: String,
    },
    TextStreamDelta {
        stream_id: String,
        delta: String,
    },
    TextStreamEnd {
        stream_id: String,
    },
    ReasoningStreamStart {
        stream_id: String,
    },
    ReasoningStreamDelta {
        stream_id: String,
        delta: String,
    },
    ReasoningStreamEnd {
        stream_id: String,
    },
    /// A complete, non-incremental status line ("Writing 3 records…").
    Status {
        message: String,
    },
    StepStart,
    StepEnd,
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_output: serde_json::Value,
    },
    ToolExecutionError {
        tool_call_id: String,
        error_message: String,
    },
    Error {
        error_message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_type_tagged() {
        let event = StreamEvent::new(
            "step-1",
            StreamEventPayload::TextStreamDelta {
                stream_id: "llm-1".into(),
                delta: "hi".into(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "text_stream_delta");
        assert_eq!(json["step_id"], "step-1");
        assert_eq!(json["delta"], "hi");
    }

    #[test]
    fn test_event_roundtrip() {
        let event = StreamEvent::new(
            "s",
            StreamEventPayload::ToolExecutionStart {
                tool_call_id: "call-1".into(),
                tool_name: "search".into(),
                tool_input: serde_json::json!({"query": "rust"}),
            },
        )
        .with_metadata("span_id", serde_json::json!("abc"));
        let json = serde_json::to_string(&event).unwrap();
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
