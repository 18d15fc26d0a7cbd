//! ABOUTME: Converts typed stream events to browser-facing wire chunks
//! ABOUTME: Chunk ids stay stable across one stream's start/delta/end and differ across streams

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use weft_core::{StreamEvent, StreamEventPayload};

/// The wire chunk vocabulary consumed by a browser client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Chunk {
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    MessageMetadata {
        message_metadata: serde_json::Value,
    },
    StartStep,
    FinishStep,
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolInputDelta {
        tool_call_id: String,
        input_text_delta: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: serde_json::Value,
    },
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    Error {
        error_text: String,
    },
}

/// Stateful converter maintaining per-`stream_id` chunk id correlation.
#[derive(Debug, Default)]
pub struct StreamEventConverter {
    chunk_ids: HashMap<String, String>,
}

impl StreamEventConverter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk_id(&mut self, stream_id: &str) -> String {
        self.chunk_ids
            .entry(stream_id.to_string())
            .or_insert_with(|| Uuid::new_v4().simple().to_string())
            .clone()
    }

    fn close_stream(&mut self, stream_id: &str) -> String {
        self.chunk_ids
            .remove(stream_id)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
    }

    /// Convert one event into zero or more wire chunks.
    pub fn convert(&mut self, event: &StreamEvent) -> Vec<Chunk> {
        match &event.payload {
            StreamEventPayload::TextStreamStart { stream_id } => vec![Chunk::TextStart {
                id: self.chunk_id(stream_id),
            }],
            StreamEventPayload::TextStreamDelta { stream_id, delta } => {
                vec![Chunk::TextDelta {
                    id: self.chunk_id(stream_id),
                    delta: delta.clone(),
                }]
            }
            StreamEventPayload::TextStreamEnd { stream_id } => vec![Chunk::TextEnd {
                id: self.close_stream(stream_id),
            }],
            StreamEventPayload::ReasoningStreamStart { stream_id } => {
                vec![Chunk::ReasoningStart {
                    id: self.chunk_id(stream_id),
                }]
            }
            StreamEventPayload::ReasoningStreamDelta { stream_id, delta } => {
                vec![Chunk::ReasoningDelta {
                    id: self.chunk_id(stream_id),
                    delta: delta.clone(),
                }]
            }
            StreamEventPayload::ReasoningStreamEnd { stream_id } => {
                vec![Chunk::ReasoningEnd {
                    id: self.close_stream(stream_id),
                }]
            }
            StreamEventPayload::Status { message } => vec![Chunk::MessageMetadata {
                message_metadata: json!({"statusMessage": message}),
            }],
            StreamEventPayload::StepStart => vec![
                Chunk::StartStep,
                Chunk::MessageMetadata {
                    message_metadata: json!({"step_id": event.step_id}),
                },
            ],
            StreamEventPayload::StepEnd => vec![Chunk::FinishStep],
            StreamEventPayload::ToolExecutionStart {
                tool_call_id,
                tool_name,
                tool_input,
            } => vec![
                Chunk::ToolInputStart {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                },
                Chunk::ToolInputDelta {
                    tool_call_id: tool_call_id.clone(),
                    input_text_delta: tool_input.to_string(),
                },
                Chunk::ToolInputAvailable {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    input: tool_input.clone(),
                },
            ],
            StreamEventPayload::ToolExecutionEnd {
                tool_call_id,
                tool_output,
            } => vec![Chunk::ToolOutputAvailable {
                tool_call_id: tool_call_id.clone(),
                output: tool_output.clone(),
            }],
            StreamEventPayload::ToolExecutionError {
                tool_call_id,
                error_message,
            } => vec![Chunk::ToolOutputError {
                tool_call_id: tool_call_id.clone(),
                error_text: error_message.clone(),
            }],
            StreamEventPayload::Error { error_message } => vec![Chunk::Error {
                error_text: error_message.clone(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: StreamEventPayload) -> StreamEvent {
        StreamEvent::new("test-step", payload)
    }

    #[test]
    fn test_text_stream_keeps_one_chunk_id() {
        let mut converter = StreamEventConverter::new();
        let start = converter.convert(&event(StreamEventPayload::TextStreamStart {
            stream_id: "s1".into(),
        }));
        let Chunk::TextStart { id } = &start[0] else {
            panic!("expected text start");
        };
        let id = id.clone();

        for delta_text in ["The ", "answer ", "is 42"] {
            let chunks = converter.convert(&event(StreamEventPayload::TextStreamDelta {
                stream_id: "s1".into(),
                delta: delta_text.into(),
            }));
            let Chunk::TextDelta { id: delta_id, delta } = &chunks[0] else {
                panic!("expected delta");
            };
            assert_eq!(delta_id, &id);
            assert_eq!(delta, delta_text);
        }

        let end = converter.convert(&event(StreamEventPayload::TextStreamEnd {
            stream_id: "s1".into(),
        }));
        assert_eq!(end[0], Chunk::TextEnd { id });
    }

    #[test]
    fn test_concurrent_streams_get_distinct_ids() {
        let mut converter = StreamEventConverter::new();
        let one = converter.convert(&event(StreamEventPayload::TextStreamStart {
            stream_id: "s1".into(),
        }));
        let two = converter.convert(&event(StreamEventPayload::TextStreamStart {
            stream_id: "s2".into(),
        }));
        let (Chunk::TextStart { id: id_one }, Chunk::TextStart { id: id_two }) =
            (&one[0], &two[0])
        else {
            panic!("expected text starts");
        };
        assert_ne!(id_one, id_two);
    }

    #[test]
    fn test_status_becomes_message_metadata() {
        let mut converter = StreamEventConverter::new();
        let chunks = converter.convert(&event(StreamEventPayload::Status {
            message: "Writing 3 records to out.csv".into(),
        }));
        assert_eq!(chunks.len(), 1);
        let Chunk::MessageMetadata { message_metadata } = &chunks[0] else {
            panic!("expected metadata chunk");
        };
        assert_eq!(
            message_metadata["statusMessage"],
            "Writing 3 records to out.csv"
        );
    }

    #[test]
    fn test_step_start_emits_boundary_and_metadata() {
        let mut converter = StreamEventConverter::new();
        let chunks = converter.convert(&event(StreamEventPayload::StepStart));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], Chunk::StartStep);
        let Chunk::MessageMetadata { message_metadata } = &chunks[1] else {
            panic!("expected metadata chunk");
        };
        assert_eq!(message_metadata["step_id"], "test-step");
    }

    #[test]
    fn test_tool_execution_start_is_three_chunks() {
        let mut converter = StreamEventConverter::new();
        let chunks = converter.convert(&event(StreamEventPayload::ToolExecutionStart {
            tool_call_id: "tool-1".into(),
            tool_name: "search".into(),
            tool_input: json!({"query": "rust"}),
        }));
        assert_eq!(chunks.len(), 3);
        assert!(matches!(chunks[0], Chunk::ToolInputStart { .. }));
        assert!(matches!(chunks[1], Chunk::ToolInputDelta { .. }));
        let Chunk::ToolInputAvailable {
            tool_call_id,
            input,
            ..
        } = &chunks[2]
        else {
            panic!("expected tool input available");
        };
        assert_eq!(tool_call_id, "tool-1");
        assert_eq!(input["query"], "rust");
    }

    #[test]
    fn test_llm_scenario_chunk_sequence() {
        let mut converter = StreamEventConverter::new();
        let events = vec![
            StreamEventPayload::StepStart,
            StreamEventPayload::TextStreamStart {
                stream_id: "llm-1".into(),
            },
            StreamEventPayload::TextStreamDelta {
                stream_id: "llm-1".into(),
                delta: "The ".into(),
            },
            StreamEventPayload::TextStreamDelta {
                stream_id: "llm-1".into(),
                delta: "answer".into(),
            },
            StreamEventPayload::TextStreamEnd {
                stream_id: "llm-1".into(),
            },
            StreamEventPayload::StepEnd,
        ];
        let chunks: Vec<Chunk> = events
            .into_iter()
            .flat_map(|payload| converter.convert(&event(payload)))
            .collect();
        // StepStart (2) + start (1) + deltas (2) + end (1) + StepEnd (1)
        assert_eq!(chunks.len(), 7);
        assert!(matches!(chunks[0], Chunk::StartStep));
        assert!(matches!(chunks[6], Chunk::FinishStep));
    }

    #[test]
    fn test_chunk_serialization_is_kebab_tagged() {
        let chunk = Chunk::ToolOutputError {
            tool_call_id: "t".into(),
            error_text: "Connection timeout".into(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "tool-output-error");
        assert_eq!(json["error_text"], "Connection timeout");
    }
}
