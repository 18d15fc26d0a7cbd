//! ABOUTME: Resolved semantic model where every reference is an object pointer
//! ABOUTME: Immutable after validation; descriptors live for the process

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use weft_core::{TypeRegistry, VarType};

use crate::model::{DecoderFormat, ErrorMode, FlowMode, SecretValue, StepCardinality};

pub use crate::model::CacheConfig;

/// A declared variable with its resolved type.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: String,
    pub ty: VarType,
    pub optional: bool,
}

/// A resolved model descriptor. Embedding models carry `dimensions`.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub id: String,
    pub provider: String,
    pub model_id: Option<String>,
    pub inference_params: serde_json::Map<String, serde_json::Value>,
    pub auth: Option<Arc<AuthProvider>>,
    pub dimensions: Option<usize>,
}

impl Model {
    /// Provider-side model name, defaulting to the descriptor id.
    #[must_use]
    pub fn provider_model_id(&self) -> &str {
        self.model_id.as_deref().unwrap_or(&self.id)
    }

    #[must_use]
    pub fn is_embedding(&self) -> bool {
        self.dimensions.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    pub id: String,
    pub token_limit: usize,
    pub chat_history_token_ratio: f64,
    pub token_flush_size: usize,
}

/// A resolved authentication provider.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthProvider {
    ApiKey {
        id: String,
        api_key: SecretValue,
        host: Option<String>,
    },
    BearerToken {
        id: String,
        token: SecretValue,
    },
    OAuth2 {
        id: String,
        client_id: String,
        client_secret: SecretValue,
        token_url: String,
        scopes: Vec<String>,
    },
    Cloud {
        id: String,
        access_key_id: Option<SecretValue>,
        secret_access_key: Option<SecretValue>,
        session_token: Option<SecretValue>,
        profile_name: Option<String>,
        role_arn: Option<String>,
        role_session_name: Option<String>,
        external_id: Option<String>,
        region: Option<String>,
    },
}

impl AuthProvider {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::ApiKey { id, .. }
            | Self::BearerToken { id, .. }
            | Self::OAuth2 { id, .. }
            | Self::Cloud { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub ty: VarType,
    pub optional: bool,
}

/// How a tool is invoked.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSpec {
    Function {
        module_path: String,
        function_name: String,
    },
    Api {
        endpoint: String,
        method: String,
        headers: BTreeMap<String, String>,
        auth: Option<Arc<AuthProvider>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub inputs: BTreeMap<String, ToolParameter>,
    pub outputs: BTreeMap<String, ToolParameter>,
    pub spec: ToolSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    Vector { embedding_model: Arc<Model> },
    Document,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub id: String,
    pub name: String,
    pub args: serde_json::Map<String, serde_json::Value>,
    pub auth: Option<Arc<AuthProvider>>,
    pub kind: IndexKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySink {
    pub id: String,
    pub provider: String,
    pub endpoint: String,
    pub auth: Option<Arc<AuthProvider>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecretManagerConfig {
    pub id: String,
    pub provider: String,
    pub auth: Option<Arc<AuthProvider>>,
}

/// Runtime knobs shared by every step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRuntime {
    pub cardinality: StepCardinality,
    pub num_workers: usize,
    pub batch_size: usize,
    pub cache: Option<CacheConfig>,
    pub error_mode: ErrorMode,
    pub timeout: Option<Duration>,
}

impl Default for StepRuntime {
    fn default() -> Self {
        Self {
            cardinality: StepCardinality::One,
            num_workers: 1,
            batch_size: 1,
            cache: None,
            error_mode: ErrorMode::Drop,
            timeout: None,
        }
    }
}

/// Where a prompt template comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    Inline(String),
    Path(String),
}

/// Where a file path comes from at run time.
#[derive(Debug, Clone, PartialEq)]
pub enum PathBinding {
    Constant(String),
    Variable(Arc<Variable>),
}

/// A resolved step: identity, declared variables, runtime knobs, and the
/// kind-specific payload with direct object pointers.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub runtime: StepRuntime,
    pub inputs: Vec<Arc<Variable>>,
    pub outputs: Vec<Arc<Variable>>,
    pub kind: StepKind,
}

impl Step {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    PromptTemplate {
        template: TemplateSource,
    },
    LlmInference {
        model: Arc<Model>,
        system_message: Option<String>,
        memory: Option<Arc<Memory>>,
    },
    Agent {
        model: Arc<Model>,
        system_message: Option<String>,
        memory: Option<Arc<Memory>>,
        tools: Vec<Arc<Tool>>,
    },
    InvokeTool {
        tool: Arc<Tool>,
        input_bindings: BTreeMap<String, String>,
        output_bindings: BTreeMap<String, String>,
    },
    InvokeFlow {
        flow: Arc<Flow>,
        input_bindings: BTreeMap<String, String>,
        output_bindings: BTreeMap<String, String>,
    },
    Decoder {
        format: DecoderFormat,
    },
    Echo,
    Construct {
        field_bindings: BTreeMap<String, String>,
    },
    Explode,
    Collect,
    Aggregate,
    FieldExtractor {
        json_path: String,
    },
    FileSource {
        path: PathBinding,
    },
    FileSink {
        path: PathBinding,
        error_dir: Option<String>,
    },
    SqlSource {
        query: String,
        connection: String,
        auth: Option<Arc<AuthProvider>>,
    },
    DocumentSource {
        reader: String,
        args: serde_json::Map<String, serde_json::Value>,
        auth: Option<Arc<AuthProvider>>,
    },
    DocumentSplitter {
        splitter_name: String,
        chunk_size: usize,
        chunk_overlap: usize,
    },
    DocumentEmbedder {
        model: Arc<Model>,
    },
    IndexUpsert {
        index: Arc<Index>,
    },
    VectorSearch {
        index: Arc<Index>,
        default_top_k: usize,
        filters: serde_json::Map<String, serde_json::Value>,
    },
    DocumentSearch {
        index: Arc<Index>,
        filters: serde_json::Map<String, serde_json::Value>,
    },
    Flow(Arc<Flow>),
}

impl StepKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PromptTemplate { .. } => "PromptTemplate",
            Self::LlmInference { .. } => "LLMInference",
            Self::Agent { .. } => "Agent",
            Self::InvokeTool { .. } => "InvokeTool",
            Self::InvokeFlow { .. } => "InvokeFlow",
            Self::Decoder { .. } => "Decoder",
            Self::Echo => "Echo",
            Self::Construct { .. } => "Construct",
            Self::Explode => "Explode",
            Self::Collect => "Collect",
            Self::Aggregate => "Aggregate",
            Self::FieldExtractor { .. } => "FieldExtractor",
            Self::FileSource { .. } => "FileSource",
            Self::FileSink { .. } => "FileSink",
            Self::SqlSource { .. } => "SQLSource",
            Self::DocumentSource { .. } => "DocumentSource",
            Self::DocumentSplitter { .. } => "DocumentSplitter",
            Self::DocumentEmbedder { .. } => "DocumentEmbedder",
            Self::IndexUpsert { .. } => "IndexUpsert",
            Self::VectorSearch { .. } => "VectorSearch",
            Self::DocumentSearch { .. } => "DocumentSearch",
            Self::Flow(_) => "Flow",
        }
    }
}

/// A resolved flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub id: String,
    pub description: Option<String>,
    pub mode: FlowMode,
    pub steps: Vec<Arc<Step>>,
    pub inputs: Vec<Arc<Variable>>,
    pub outputs: Vec<Arc<Variable>>,
}

/// The fully resolved application.
#[derive(Debug, Clone)]
pub struct Application {
    pub id: String,
    pub description: Option<String>,
    pub types: TypeRegistry,
    pub variables: Vec<Arc<Variable>>,
    pub models: Vec<Arc<Model>>,
    pub memories: Vec<Arc<Memory>>,
    pub auths: Vec<Arc<AuthProvider>>,
    pub tools: Vec<Arc<Tool>>,
    pub indexes: Vec<Arc<Index>>,
    pub flows: Vec<Arc<Flow>>,
    pub telemetry: Option<Arc<TelemetrySink>>,
    pub secret_manager: Option<Arc<SecretManagerConfig>>,
}

impl Application {
    /// Look up a flow by id.
    #[must_use]
    pub fn flow(&self, id: &str) -> Option<&Arc<Flow>> {
        self.flows.iter().find(|f| f.id == id)
    }
}
