//! ABOUTME: Error types and handling for the weft runtime
//! ABOUTME: Provides the WeftError enum and Result type alias

use thiserror::Error;

/// Comprehensive error enum for all weft operations.
///
/// Each variant corresponds to one failure kind with a distinct wire
/// representation. Load-time kinds (`Loader`, `Resolution`, `Validation`)
/// are fatal and never produce a partial document; runtime kinds are scoped
/// to a single step or adapter call unless the step's error mode says
/// otherwise.
#[derive(Debug, Error)]
pub enum WeftError {
    /// YAML parse failure, missing include, or missing required env var.
    #[error("Loader error: {message}")]
    Loader {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Duplicate ID, unresolved reference, or type-grammar failure.
    /// Carries every problem found, not just the first.
    #[error("Resolution failed:\n{}", .issues.join("\n"))]
    Resolution { issues: Vec<String> },

    /// A structural invariant of the document was broken.
    #[error("Validation failed:\n{}", .issues.join("\n"))]
    Validation { issues: Vec<String> },

    /// Invalid adapter or step configuration discovered at run time.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Secret manager missing or a secret backend failure.
    #[error("Secret resolution error: {message}")]
    SecretResolution { message: String },

    /// Uncaught failure inside a step executor.
    #[error("Step '{step_id}' failed: {message}")]
    Step { step_id: String, message: String },

    /// Failure talking to an external adapter (LLM, HTTP, DB, index).
    #[error("Adapter error: {message}")]
    Adapter {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Caller-initiated cancellation.
    #[error("Execution cancelled")]
    Cancelled,

    /// Invariant violation inside the runtime itself.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl WeftError {
    /// Short kind tag used in `StepError.kind` and wire payloads.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Loader { .. } => "loader",
            Self::Resolution { .. } => "resolution",
            Self::Validation { .. } => "validation",
            Self::Configuration { .. } => "configuration",
            Self::SecretResolution { .. } => "secret_resolution",
            Self::Step { .. } => "step",
            Self::Adapter { .. } => "adapter",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }

    /// Convenience constructor for loader failures without a source error.
    pub fn loader(message: impl Into<String>) -> Self {
        Self::Loader {
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
            source: None,
        }
    }

    pub fn step(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, WeftError>;
