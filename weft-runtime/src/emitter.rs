//! ABOUTME: Stream event emission helpers shared by executors
//! ABOUTME: Guard types keep start/delta/end triples on one stream_id

use std::collections::HashMap;
use std::sync::Arc;

use weft_core::{StreamEvent, StreamEventPayload};

/// Callback receiving real-time stream events.
pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Emits typed stream events on behalf of one step. Cheap to clone; events
/// go nowhere when no callback is configured.
#[derive(Clone)]
pub struct StreamEmitter {
    step_id: String,
    callback: Option<StreamCallback>,
    metadata: HashMap<String, serde_json::Value>,
}

impl StreamEmitter {
    #[must_use]
    pub fn new(step_id: impl Into<String>, callback: Option<StreamCallback>) -> Self {
        Self {
            step_id: step_id.into(),
            callback,
            metadata: HashMap::new(),
        }
    }

    /// Attach metadata (span/trace ids) carried on every emitted event.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.callback.is_some()
    }

    pub fn emit(&self, payload: StreamEventPayload) {
        if let Some(callback) = &self.callback {
            let mut event = StreamEvent::new(&self.step_id, payload);
            event.metadata = self.metadata.clone();
            callback(event);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(StreamEventPayload::Status {
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(StreamEventPayload::Error {
            error_message: message.into(),
        });
    }

    pub fn step_start(&self) {
        self.emit(StreamEventPayload::StepStart);
    }

    pub fn step_end(&self) {
        self.emit(StreamEventPayload::StepEnd);
    }

    pub fn tool_start(&self, call_id: &str, tool_name: &str, input: serde_json::Value) {
        self.emit(StreamEventPayload::ToolExecutionStart {
            tool_call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            tool_input: input,
        });
    }

    pub fn tool_end(&self, call_id: &str, output: serde_json::Value) {
        self.emit(StreamEventPayload::ToolExecutionEnd {
            tool_call_id: call_id.to_string(),
            tool_output: output,
        });
    }

    pub fn tool_error(&self, call_id: &str, message: impl Into<String>) {
        self.emit(StreamEventPayload::ToolExecutionError {
            tool_call_id: call_id.to_string(),
            error_message: message.into(),
        });
    }

    /// Open an incremental text stream; the guard emits the end event when
    /// dropped.
    #[must_use]
    pub fn text_stream(&self, stream_id: impl Into<String>) -> IncrementalStream {
        IncrementalStream::open(self.clone(), stream_id.into(), StreamFlavor::Text)
    }

    /// Open an incremental reasoning stream.
    #[must_use]
    pub fn reasoning_stream(&self, stream_id: impl Into<String>) -> IncrementalStream {
        IncrementalStream::open(self.clone(), stream_id.into(), StreamFlavor::Reasoning)
    }
}

#[derive(Clone, Copy)]
enum StreamFlavor {
    Text,
    Reasoning,
}

/// An open start/delta/end bracket with a stable stream id.
pub struct IncrementalStream {
    emitter: StreamEmitter,
    stream_id: String,
    flavor: StreamFlavor,
}

impl IncrementalStream {
    fn open(emitter: StreamEmitter, stream_id: String, flavor: StreamFlavor) -> Self {
        let payload = match flavor {
            StreamFlavor::Text => StreamEventPayload::TextStreamStart {
                stream_id: stream_id.clone(),
            },
            StreamFlavor::Reasoning => StreamEventPayload::ReasoningStreamStart {
                stream_id: stream_id.clone(),
            },
        };
        emitter.emit(payload);
        Self {
            emitter,
            stream_id,
            flavor,
        }
    }

    pub fn delta(&self, delta: impl Into<String>) {
        let payload = match self.flavor {
            StreamFlavor::Text => StreamEventPayload::TextStreamDelta {
                stream_id: self.stream_id.clone(),
                delta: delta.into(),
            },
            StreamFlavor::Reasoning => StreamEventPayload::ReasoningStreamDelta {
                stream_id: self.stream_id.clone(),
                delta: delta.into(),
            },
        };
        self.emitter.emit(payload);
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }
}

impl Drop for IncrementalStream {
    fn drop(&mut self) {
        let payload = match self.flavor {
            StreamFlavor::Text => StreamEventPayload::TextStreamEnd {
                stream_id: self.stream_id.clone(),
            },
            StreamFlavor::Reasoning => StreamEventPayload::ReasoningStreamEnd {
                stream_id: self.stream_id.clone(),
            },
        };
        self.emitter.emit(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collecting() -> (StreamEmitter, Arc<Mutex<Vec<StreamEvent>>>) {
        let seen: Arc<Mutex<Vec<StreamEvent>>> = Arc::default();
        let sink = seen.clone();
        let emitter = StreamEmitter::new(
            "step-1",
            Some(Arc::new(move |event| sink.lock().push(event)) as StreamCallback),
        );
        (emitter, seen)
    }

    #[test]
    fn test_text_stream_brackets_deltas() {
        let (emitter, seen) = collecting();
        {
            let stream = emitter.text_stream("llm-1");
            stream.delta("a");
            stream.delta("b");
        }
        let events = seen.lock();
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[0].payload,
            StreamEventPayload::TextStreamStart { .. }
        ));
        assert!(matches!(
            events[3].payload,
            StreamEventPayload::TextStreamEnd { .. }
        ));
        // All four share the stream id.
        for event in events.iter() {
            match &event.payload {
                StreamEventPayload::TextStreamStart { stream_id }
                | StreamEventPayload::TextStreamDelta { stream_id, .. }
                | StreamEventPayload::TextStreamEnd { stream_id } => {
                    assert_eq!(stream_id, "llm-1");
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn test_no_callback_is_silent() {
        let emitter = StreamEmitter::new("step-1", None);
        assert!(!emitter.is_active());
        emitter.status("nothing listens");
    }
}
