//! ABOUTME: Surface document model with string references and type-tagged unions
//! ABOUTME: Bare-string reference fields normalize to `$ref` stubs at parse time

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// A reference-typed field: either an explicit object or a pointer to one.
///
/// Authors may write a bare id (`auth: my_key_auth`), an explicit stub
/// (`auth: {$ref: my_key_auth}`), or inline the full object. Bare strings
/// are rewritten into stubs during deserialization, so a serialize→load
/// round trip is stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Ref<T> {
    Ref {
        #[serde(rename = "$ref")]
        id: String,
    },
    Inline(Box<T>),
}

impl<T> Ref<T> {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Ref { id: id.into() }
    }

    #[must_use]
    pub fn as_inline(&self) -> Option<&T> {
        match self {
            Self::Inline(t) => Some(t),
            Self::Ref { .. } => None,
        }
    }

    #[must_use]
    pub fn ref_id(&self) -> Option<&str> {
        match self {
            Self::Ref { id } => Some(id),
            Self::Inline(_) => None,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Ref<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw<T> {
            Stub {
                #[serde(rename = "$ref")]
                id: String,
            },
            Inline(Box<T>),
            Id(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Stub { id } | Raw::Id(id) => Self::Ref { id },
            Raw::Inline(inner) => Self::Inline(inner),
        })
    }
}

/// A secret-valued field: a literal string or a reference into the
/// configured secret manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    Reference(SecretReference),
    Literal(String),
}

/// Pointer to a secret held by the secret manager. When `key` is present the
/// secret is a JSON object and that field is extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretReference {
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Declared output multiplicity of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepCardinality {
    One,
    Many,
}

/// Behaviour when a step error occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Abort the whole flow run.
    Fail,
    /// Convert the message to a failed message that bypasses downstream steps.
    Drop,
    /// Like `Drop`, but the failure is also cached so replays are idempotent.
    Cache,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub num_workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub batch_size: usize,
}

/// Step-level cache configuration. Entries are keyed by the content
/// fingerprint of the input message and never evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub directory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default = "default_cache_version")]
    pub version: String,
}

fn default_cache_version() -> String {
    "v1".to_string()
}

/// Fields shared by every step kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCommon {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<StepCardinality>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Ref<Variable>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Ref<Variable>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<ConcurrencyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_mode: Option<ErrorMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

impl StepCommon {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cardinality: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            concurrency: None,
            batch: None,
            cache: None,
            error_mode: None,
            timeout_seconds: None,
        }
    }
}

/// A named, typed slot carrying a value between steps.
///
/// The type stays a raw string here; the grammar (`list[T]`, trailing `?`)
/// is parsed during semantic resolution so the surface form round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    #[serde(rename = "type")]
    pub type_string: String,
}

/// A user-declared nominal object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTypeDecl {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub properties: BTreeMap<String, String>,
}

/// A generative or embedding model descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModelDef {
    Model(ModelFields),
    EmbeddingModel(EmbeddingModelFields),
}

impl ModelDef {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Model(m) => &m.id,
            Self::EmbeddingModel(m) => &m.base.id,
        }
    }

    #[must_use]
    pub fn auth(&self) -> Option<&Ref<AuthDef>> {
        match self {
            Self::Model(m) => m.auth.as_ref(),
            Self::EmbeddingModel(m) => m.base.auth.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFields {
    pub id: String,
    /// Provider name, e.g. `openai` or `anthropic`.
    pub provider: String,
    /// Provider-side model name; falls back to `id` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub inference_params: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Ref<AuthDef>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModelFields {
    #[serde(flatten)]
    pub base: ModelFields,
    /// Dimensionality of the produced vectors.
    pub dimensions: usize,
}

/// Session memory configuration for LLM steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDef {
    pub id: String,
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    #[serde(default = "default_history_ratio")]
    pub chat_history_token_ratio: f64,
    #[serde(default = "default_flush_size")]
    pub token_flush_size: usize,
}

fn default_token_limit() -> usize {
    100_000
}
fn default_history_ratio() -> f64 {
    0.7
}
fn default_flush_size() -> usize {
    3_000
}

/// A tool input or output parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    #[serde(rename = "type")]
    pub type_string: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommon {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, ToolParameter>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ToolParameter>,
}

/// A callable tool: a registered native function or an HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolDef {
    FunctionTool {
        #[serde(flatten)]
        common: ToolCommon,
        /// Registry namespace the function lives in.
        module_path: String,
        function_name: String,
    },
    #[serde(rename = "APITool")]
    ApiTool {
        #[serde(flatten)]
        common: ToolCommon,
        endpoint: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<Ref<AuthDef>>,
    },
}

fn default_http_method() -> String {
    "GET".to_string()
}

impl ToolDef {
    #[must_use]
    pub fn common(&self) -> &ToolCommon {
        match self {
            Self::FunctionTool { common, .. } | Self::ApiTool { common, .. } => common,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.common().id
    }
}

/// Authentication provider descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthDef {
    #[serde(rename = "api_key")]
    ApiKey {
        id: String,
        api_key: SecretValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
    },
    #[serde(rename = "bearer_token")]
    BearerToken { id: String, token: SecretValue },
    #[serde(rename = "oauth2")]
    OAuth2 {
        id: String,
        client_id: String,
        client_secret: SecretValue,
        token_url: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        scopes: Vec<String>,
    },
    /// Cloud-session auth supporting static keys, a named profile, or role
    /// assumption on top of base credentials.
    #[serde(rename = "cloud")]
    Cloud {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_key_id: Option<SecretValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_access_key: Option<SecretValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_token: Option<SecretValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role_arn: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role_session_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
}

impl AuthDef {
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

/// A searchable index descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IndexDef {
    VectorIndex {
        id: String,
        name: String,
        embedding_model: Ref<ModelDef>,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        args: serde_json::Map<String, serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<Ref<AuthDef>>,
    },
    DocumentIndex {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        args: serde_json::Map<String, serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<Ref<AuthDef>>,
    },
}

impl IndexDef {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::VectorIndex { id, .. } | Self::DocumentIndex { id, .. } => id,
        }
    }
}

/// An observability endpoint for trace export and feedback submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySinkDef {
    pub id: String,
    /// Backend name used to pick the feedback client implementation.
    pub provider: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Ref<AuthDef>>,
}

/// Secret manager descriptor; the backend is chosen by `provider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretManagerDef {
    pub id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Ref<AuthDef>>,
}

/// How the decoder step interprets its input string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderFormat {
    Json,
    Xml,
}

/// Interaction contract of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowMode {
    /// One message in, one result out.
    Complete,
    /// The first chat-typed input is the current user turn; session history
    /// supplies the rest of the conversation.
    Chat,
}

impl Default for FlowMode {
    fn default() -> Self {
        Self::Complete
    }
}

/// A file path: a constant URI or a variable carrying one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSpec {
    Constant { uri: String },
    Variable(Ref<Variable>),
}

/// An ordered pipeline of steps; itself usable as a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub mode: FlowMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Ref<StepDef>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Ref<Variable>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Ref<Variable>>,
}

/// The step union, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StepDef {
    PromptTemplate {
        #[serde(flatten)]
        common: StepCommon,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    #[serde(rename = "LLMInference")]
    LlmInference {
        #[serde(flatten)]
        common: StepCommon,
        model: Ref<ModelDef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory: Option<Ref<MemoryDef>>,
    },
    Agent {
        #[serde(flatten)]
        common: StepCommon,
        model: Ref<ModelDef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory: Option<Ref<MemoryDef>>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tools: Vec<Ref<ToolDef>>,
    },
    InvokeTool {
        #[serde(flatten)]
        common: StepCommon,
        tool: Ref<ToolDef>,
        /// tool parameter name -> step variable id
        input_bindings: BTreeMap<String, String>,
        /// tool output name -> step variable id
        output_bindings: BTreeMap<String, String>,
    },
    InvokeFlow {
        #[serde(flatten)]
        common: StepCommon,
        flow: Ref<FlowDef>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        input_bindings: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        output_bindings: BTreeMap<String, String>,
    },
    Decoder {
        #[serde(flatten)]
        common: StepCommon,
        #[serde(default = "default_decoder_format")]
        format: DecoderFormat,
    },
    Echo {
        #[serde(flatten)]
        common: StepCommon,
    },
    Construct {
        #[serde(flatten)]
        common: StepCommon,
        /// custom type field name -> input variable id
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        field_bindings: BTreeMap<String, String>,
    },
    Explode {
        #[serde(flatten)]
        common: StepCommon,
    },
    Collect {
        #[serde(flatten)]
        common: StepCommon,
    },
    Aggregate {
        #[serde(flatten)]
        common: StepCommon,
    },
    FieldExtractor {
        #[serde(flatten)]
        common: StepCommon,
        json_path: String,
    },
    FileSource {
        #[serde(flatten)]
        common: StepCommon,
        path: PathSpec,
    },
    FileSink {
        #[serde(flatten)]
        common: StepCommon,
        path: PathSpec,
        /// Directory for `{step_id}.errors.parquet` files; errors are not
        /// persisted when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_dir: Option<String>,
    },
    #[serde(rename = "SQLSource")]
    SqlSource {
        #[serde(flatten)]
        common: StepCommon,
        query: String,
        connection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<Ref<AuthDef>>,
    },
    DocumentSource {
        #[serde(flatten)]
        common: StepCommon,
        reader: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        args: serde_json::Map<String, serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<Ref<AuthDef>>,
    },
    DocumentSplitter {
        #[serde(flatten)]
        common: StepCommon,
        #[serde(default = "default_splitter_name")]
        splitter_name: String,
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
        #[serde(default = "default_chunk_overlap")]
        chunk_overlap: usize,
    },
    DocumentEmbedder {
        #[serde(flatten)]
        common: StepCommon,
        model: Ref<ModelDef>,
    },
    IndexUpsert {
        #[serde(flatten)]
        common: StepCommon,
        index: Ref<IndexDef>,
    },
    VectorSearch {
        #[serde(flatten)]
        common: StepCommon,
        index: Ref<IndexDef>,
        #[serde(default = "default_top_k")]
        default_top_k: usize,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        filters: serde_json::Map<String, serde_json::Value>,
    },
    DocumentSearch {
        #[serde(flatten)]
        common: StepCommon,
        index: Ref<IndexDef>,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        filters: serde_json::Map<String, serde_json::Value>,
    },
    Flow(FlowDef),
}

fn default_decoder_format() -> DecoderFormat {
    DecoderFormat::Json
}
fn default_splitter_name() -> String {
    "sentence".to_string()
}
fn default_chunk_size() -> usize {
    1024
}
fn default_chunk_overlap() -> usize {
    20
}
fn default_top_k() -> usize {
    50
}

impl StepDef {
    /// The step id, for any variant.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::PromptTemplate { common, .. }
            | Self::LlmInference { common, .. }
            | Self::Agent { common, .. }
            | Self::InvokeTool { common, .. }
            | Self::InvokeFlow { common, .. }
            | Self::Decoder { common, .. }
            | Self::Echo { common }
            | Self::Construct { common, .. }
            | Self::Explode { common }
            | Self::Collect { common }
            | Self::Aggregate { common }
            | Self::FieldExtractor { common, .. }
            | Self::FileSource { common, .. }
            | Self::FileSink { common, .. }
            | Self::SqlSource { common, .. }
            | Self::DocumentSource { common, .. }
            | Self::DocumentSplitter { common, .. }
            | Self::DocumentEmbedder { common, .. }
            | Self::IndexUpsert { common, .. }
            | Self::VectorSearch { common, .. }
            | Self::DocumentSearch { common, .. } => &common.id,
            Self::Flow(flow) => &flow.id,
        }
    }

    /// The shared fields, when this is not a nested flow.
    #[must_use]
    pub fn common(&self) -> Option<&StepCommon> {
        match self {
            Self::PromptTemplate { common, .. }
            | Self::LlmInference { common, .. }
            | Self::Agent { common, .. }
            | Self::InvokeTool { common, .. }
            | Self::InvokeFlow { common, .. }
            | Self::Decoder { common, .. }
            | Self::Echo { common }
            | Self::Construct { common, .. }
            | Self::Explode { common }
            | Self::Collect { common }
            | Self::Aggregate { common }
            | Self::FieldExtractor { common, .. }
            | Self::FileSource { common, .. }
            | Self::FileSink { common, .. }
            | Self::SqlSource { common, .. }
            | Self::DocumentSource { common, .. }
            | Self::DocumentSplitter { common, .. }
            | Self::DocumentEmbedder { common, .. }
            | Self::IndexUpsert { common, .. }
            | Self::VectorSearch { common, .. }
            | Self::DocumentSearch { common, .. } => Some(common),
            Self::Flow(_) => None,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::PromptTemplate { .. } => "PromptTemplate",
            Self::LlmInference { .. } => "LLMInference",
            Self::Agent { .. } => "Agent",
            Self::InvokeTool { .. } => "InvokeTool",
            Self::InvokeFlow { .. } => "InvokeFlow",
            Self::Decoder { .. } => "Decoder",
            Self::Echo { .. } => "Echo",
            Self::Construct { .. } => "Construct",
            Self::Explode { .. } => "Explode",
            Self::Collect { .. } => "Collect",
            Self::Aggregate { .. } => "Aggregate",
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

impl fmt::Display for StepDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind_name(), self.id())
    }
}

/// The full application document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<CustomTypeDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memories: Vec<MemoryDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flows: Vec<FlowDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auths: Vec<AuthDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySinkDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_manager: Option<SecretManagerDef>,
    /// Other weft documents whose components this one may reference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<DocumentRoot>,
}

/// A standalone list document of one component kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentList {
    Auths(Vec<AuthDef>),
    Indexes(Vec<IndexDef>),
    Models(Vec<ModelDef>),
    Tools(Vec<ToolDef>),
    Types(Vec<CustomTypeDecl>),
    Variables(Vec<Variable>),
}

/// Any valid top-level document shape.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentRoot {
    Application(Application),
    Flow(FlowDef),
    Agent(Box<StepDef>),
    List(ComponentList),
}

impl Serialize for DocumentRoot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Application(app) => app.serialize(serializer),
            // Flows and agents keep their `type:` discriminator so a
            // serialize -> load round trip dispatches the same way.
            Self::Flow(flow) => StepDef::Flow(flow.clone()).serialize(serializer),
            Self::Agent(step) => step.serialize(serializer),
            Self::List(list) => list.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DocumentRoot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.is_array() {
            return serde_json::from_value(value)
                .map(Self::List)
                .map_err(D::Error::custom);
        }
        if !value.is_object() {
            return Err(D::Error::custom(format!(
                "expected a mapping or a component list at the document root, got {value}"
            )));
        }
        let type_tag = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map(String::from);
        match type_tag.as_deref() {
            Some("Flow") => serde_json::from_value(value)
                .map(Self::Flow)
                .map_err(D::Error::custom),
            Some("Agent") => serde_json::from_value(value)
                .map(|step| Self::Agent(Box::new(step)))
                .map_err(D::Error::custom),
            _ => serde_json::from_value(value)
                .map(Self::Application)
                .map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_string_reference_normalizes_to_ref_stub() {
        let parsed: Ref<AuthDef> = serde_yaml::from_str("my_key_auth").unwrap();
        assert_eq!(parsed, Ref::id("my_key_auth"));
        // Serializes back as an explicit stub.
        let rendered = serde_json::to_value(&parsed).unwrap();
        assert_eq!(rendered, serde_json::json!({"$ref": "my_key_auth"}));
    }

    #[test]
    fn test_explicit_ref_stub_parses() {
        let parsed: Ref<AuthDef> = serde_yaml::from_str("$ref: other").unwrap();
        assert_eq!(parsed, Ref::id("other"));
    }

    #[test]
    fn test_inline_object_reference_parses() {
        let yaml = "type: api_key\nid: a1\napi_key: sk-123\n";
        let parsed: Ref<AuthDef> = serde_yaml::from_str(yaml).unwrap();
        let inline = parsed.as_inline().unwrap();
        assert_eq!(inline.id(), "a1");
    }

    #[test]
    fn test_step_union_discriminated_by_type() {
        let yaml = r"
type: Explode
id: fan_out
inputs: [items]
outputs: [item]
";
        let step: StepDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.kind_name(), "Explode");
        assert_eq!(step.common().unwrap().inputs.len(), 1);
    }

    #[test]
    fn test_secret_value_literal_or_reference() {
        let literal: SecretValue = serde_yaml::from_str("sk-plain").unwrap();
        assert_eq!(literal, SecretValue::Literal("sk-plain".into()));

        let reference: SecretValue =
            serde_yaml::from_str("secret_name: prod/key\nkey: api_key\n").unwrap();
        assert!(matches!(reference, SecretValue::Reference(_)));
    }

    #[test]
    fn test_document_root_dispatch() {
        let flow: DocumentRoot =
            serde_yaml::from_str("type: Flow\nid: f1\nsteps: []\n").unwrap();
        assert!(matches!(flow, DocumentRoot::Flow(_)));

        let app: DocumentRoot = serde_yaml::from_str("id: my_app\n").unwrap();
        assert!(matches!(app, DocumentRoot::Application(_)));

        let vars: DocumentRoot =
            serde_yaml::from_str("- id: question\n  type: text\n").unwrap();
        assert!(matches!(
            vars,
            DocumentRoot::List(ComponentList::Variables(_))
        ));
    }

    #[test]
    fn test_auth_list_not_mistaken_for_variables() {
        let yaml = "- type: api_key\n  id: a1\n  api_key: sk-1\n";
        let parsed: DocumentRoot = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(parsed, DocumentRoot::List(ComponentList::Auths(_))));
    }

    #[test]
    fn test_nested_flow_step_roundtrip() {
        let yaml = r"
type: Flow
id: outer
steps:
  - type: Echo
    id: pass
    inputs: [a]
    outputs: [a]
  - inner_flow
";
        let step: StepDef = serde_yaml::from_str(yaml).unwrap();
        let StepDef::Flow(flow) = &step else {
            panic!("expected flow");
        };
        assert_eq!(flow.steps.len(), 2);
        assert_eq!(flow.steps[1], Ref::id("inner_flow"));

        let json = serde_json::to_string(&step).unwrap();
        let back: StepDef = serde_json::from_str(&json).unwrap();
        assert_eq!(step, back);
    }
}
