//! ABOUTME: Core types for the weft declarative workflow runtime
//! ABOUTME: Errors, the type grammar, variable values, flow messages, and stream events
//!
//! `weft-core` holds the vocabulary shared by the DSL layer and the
//! execution engine: the primitive/domain/custom type system, the
//! heterogeneous [`Value`] carried by variables, the immutable
//! [`FlowMessage`] that moves between step executors, and the typed
//! [`StreamEvent`]s that observe execution.

pub mod error;
pub mod events;
pub mod message;
pub mod types;
pub mod value;

pub use error::{Result, WeftError};
pub use events::{StreamEvent, StreamEventPayload};
pub use message::{FlowMessage, Session, StepError, VariableSlot};
pub use types::domain::{
    ChatContent, ChatMessage, ChatRole, Embedding, RagChunk, RagDocument, SearchResult,
};
pub use types::{
    parse_type_string, CustomTypeDef, DomainTypeKind, PrimitiveType, TypeExpr, TypeRegistry,
    VarType,
};
pub use value::Value;
