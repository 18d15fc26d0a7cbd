//! ABOUTME: FlowMessage, Session, and the unset-variable sentinel
//! ABOUTME: Immutable message state passed between step executors; copies preserve telemetry metadata

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, WeftError};
use crate::types::domain::ChatMessage;
use crate::value::Value;

/// A slot in the message variable map.
///
/// Three states are distinguished: a key that is absent from the map, a key
/// present but `Unset`, and a key set to an explicit value (which may be
/// `Value::Null`). Only serialization drops `Unset` entries.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableSlot {
    Unset,
    Set(Value),
}

impl VariableSlot {
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }
}

impl From<Value> for VariableSlot {
    fn from(value: Value) -> Self {
        Self::Set(value)
    }
}

/// Structured error attached to a failed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub step_id: String,
    pub error_message: String,
    pub kind: String,
}

/// A user session shared by reference across every message spawned from one
/// initial input, so per-session state (chat memory, KV caches) can key on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            conversation_history: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.conversation_history = history;
        self
    }
}

/// The complete state of one execution path at a point in time.
///
/// This is the primary data structure passed between step executors. It is
/// immutable: every step enrichment produces a new message and prior
/// messages stay valid, which makes them safe to retain for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowMessage {
    session: Arc<Session>,
    variables: HashMap<String, VariableSlot>,
    error: Option<StepError>,
    metadata: HashMap<String, serde_json::Value>,
}

impl FlowMessage {
    #[must_use]
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            variables: HashMap::new(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn error(&self) -> Option<&StepError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    #[must_use]
    pub fn variables(&self) -> &HashMap<String, VariableSlot> {
        &self.variables
    }

    /// True iff this message has encountered an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// True when the variable is present and set (possibly to `Null`).
    #[must_use]
    pub fn is_set(&self, var_id: &str) -> bool {
        matches!(self.variables.get(var_id), Some(VariableSlot::Set(_)))
    }

    /// The variable's value, or `None` when absent or unset.
    #[must_use]
    pub fn get(&self, var_id: &str) -> Option<&Value> {
        match self.variables.get(var_id) {
            Some(VariableSlot::Set(value)) => Some(value),
            _ => None,
        }
    }

    /// The variable's value, erroring when it is absent or unset.
    pub fn variable(&self, var_id: &str) -> Result<&Value> {
        self.get(var_id).ok_or_else(|| {
            let mut available: Vec<&str> = self.variables.keys().map(String::as_str).collect();
            available.sort_unstable();
            WeftError::internal(format!(
                "required variable '{var_id}' is not set; available: [{}]",
                available.join(", ")
            ))
        })
    }

    /// The variable's value, or the given default when absent or unset.
    #[must_use]
    pub fn variable_or<'a>(&'a self, var_id: &str, default: &'a Value) -> &'a Value {
        self.get(var_id).unwrap_or(default)
    }

    /// New message with the given variables merged in. Existing keys are
    /// overwritten; an entry may be set to [`VariableSlot::Unset`] to mark a
    /// variable explicitly unset.
    #[must_use]
    pub fn with_variables<I, S>(&self, updates: I) -> Self
    where
        I: IntoIterator<Item = (S, VariableSlot)>,
        S: Into<String>,
    {
        let mut next = self.clone();
        for (key, slot) in updates {
            next.variables.insert(key.into(), slot);
        }
        next
    }

    /// New message with the given values merged in.
    #[must_use]
    pub fn with_values<I, S>(&self, updates: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        self.with_variables(
            updates
                .into_iter()
                .map(|(k, v)| (k, VariableSlot::Set(v))),
        )
    }

    /// New failed copy of this message.
    #[must_use]
    pub fn with_error(&self, step_id: &str, error: &WeftError) -> Self {
        self.with_error_record(StepError {
            step_id: step_id.to_string(),
            error_message: error.to_string(),
            kind: error.kind().to_string(),
        })
    }

    /// New failed copy carrying an already-built error record (cache
    /// replays, sub-flow propagation).
    #[must_use]
    pub fn with_error_record(&self, error: StepError) -> Self {
        let mut next = self.clone();
        next.error = Some(error);
        next
    }

    /// New copy with one metadata entry added.
    #[must_use]
    pub fn with_metadata(&self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value);
        next
    }

    /// Canonical JSON rendering: session, variables (unset entries elided,
    /// nulls preserved, keys sorted), and error. Metadata is excluded so the
    /// rendering is stable across runs.
    #[must_use]
    pub fn canonical_json(&self) -> serde_json::Value {
        let mut keys: Vec<&String> = self.variables.keys().collect();
        keys.sort();
        let mut vars = serde_json::Map::new();
        for key in keys {
            if let Some(VariableSlot::Set(value)) = self.variables.get(key) {
                vars.insert(key.clone(), value.to_json());
            }
        }
        serde_json::json!({
            "session": self.session.as_ref(),
            "variables": vars,
            "error": self.error,
        })
    }

    /// SHA-256 hex digest of the canonical rendering; used as the cache key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let rendered = self.canonical_json().to_string();
        let digest = Sha256::digest(rendered.as_bytes());
        format!("{digest:x}")
    }
}

impl Serialize for FlowMessage {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        self.canonical_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> FlowMessage {
        FlowMessage::new(Arc::new(Session::new("s-1")))
    }

    #[test]
    fn test_absent_unset_and_null_are_distinct() {
        let msg = message().with_variables([
            ("explicit_unset".to_string(), VariableSlot::Unset),
            ("explicit_null".to_string(), VariableSlot::Set(Value::Null)),
        ]);

        assert!(!msg.is_set("never_mentioned"));
        assert!(!msg.is_set("explicit_unset"));
        assert!(msg.is_set("explicit_null"));

        assert!(msg.variables().contains_key("explicit_unset"));
        assert!(!msg.variables().contains_key("never_mentioned"));
    }

    #[test]
    fn test_serialization_elides_unset_and_keeps_null() {
        let msg = message().with_variables([
            ("gone".to_string(), VariableSlot::Unset),
            ("kept".to_string(), VariableSlot::Set(Value::Null)),
        ]);
        let json = msg.canonical_json();
        let vars = json.get("variables").unwrap().as_object().unwrap();
        assert!(!vars.contains_key("gone"));
        assert!(vars.contains_key("kept"));
        assert!(vars["kept"].is_null());
    }

    #[test]
    fn test_with_variables_merges() {
        let first = message().with_values([("a", Value::from("x"))]);
        let second = first.with_values([("b", Value::from(42i64))]);
        assert_eq!(second.get("a"), Some(&Value::from("x")));
        assert_eq!(second.get("b"), Some(&Value::Int(42)));
        // The original message is untouched.
        assert!(first.get("b").is_none());
    }

    #[test]
    fn test_required_variable_error_lists_available() {
        let msg = message().with_values([("present", Value::from("v"))]);
        let err = msg.variable("missing").unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(err.to_string().contains("present"));
    }

    #[test]
    fn test_with_error_marks_failed_and_preserves_metadata() {
        let msg = message().with_metadata("span_id", serde_json::json!("abc123"));
        let failed = msg.with_error("step-1", &WeftError::step("step-1", "boom"));
        assert!(failed.is_failed());
        assert_eq!(failed.error().unwrap().step_id, "step-1");
        assert_eq!(failed.metadata()["span_id"], serde_json::json!("abc123"));
        assert!(!msg.is_failed());
    }

    #[test]
    fn test_fingerprint_stable_across_metadata_changes() {
        let base = message().with_values([("a", Value::from("x"))]);
        let with_span = base.with_metadata("span_id", serde_json::json!("zzz"));
        assert_eq!(base.fingerprint(), with_span.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_variables() {
        let a = message().with_values([("a", Value::from("x"))]);
        let b = message().with_values([("a", Value::from("y"))]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_session_shared_by_reference() {
        let session = Arc::new(Session::new("shared"));
        let one = FlowMessage::new(session.clone());
        let two = one.with_values([("v", Value::from(1i64))]);
        assert!(Arc::ptr_eq(one.session(), two.session()));
    }
}
