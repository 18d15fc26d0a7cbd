//! ABOUTME: Built-in domain object types carried by variables
//! ABOUTME: Chat messages, embeddings, RAG documents/chunks, and search results

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::PrimitiveType;

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One typed block of chat content.
///
/// Plain conversation is a single `text` block; multimodal turns carry one
/// block per attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatContent {
    /// Media kind of this block.
    #[serde(rename = "type")]
    pub kind: PrimitiveType,
    /// Block payload. Text blocks carry the text itself; binary kinds carry
    /// a URI or base64 payload.
    pub content: String,
}

impl ChatContent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: PrimitiveType::Text,
            content: content.into(),
        }
    }
}

/// A single chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub blocks: Vec<ChatContent>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            blocks: vec![ChatContent::text(text)],
        }
    }

    /// Concatenated text content of all text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.kind == PrimitiveType::Text)
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A vector embedding with its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// A raw document entering the retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagDocument {
    pub doc_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// An embeddable chunk produced by splitting a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagChunk {
    pub doc_id: String,
    pub chunk_index: usize,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// One hit returned by a search step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub doc_id: String,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_text_joins_text_blocks() {
        let msg = ChatMessage {
            role: ChatRole::User,
            blocks: vec![
                ChatContent::text("hello "),
                ChatContent {
                    kind: PrimitiveType::Image,
                    content: "s3://img.png".into(),
                },
                ChatContent::text("world"),
            ],
        };
        assert_eq!(msg.text(), "hello world");
    }

    #[test]
    fn test_search_result_roundtrip() {
        let hit = SearchResult {
            content: "doc body".into(),
            doc_id: "d-1".into(),
            score: 0.87,
        };
        let json = serde_json::to_string(&hit).unwrap();
        let back: SearchResult = serde_json::from_str(&json).unwrap();
        assert_eq!(hit, back);
    }
}
