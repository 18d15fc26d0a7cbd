//! ABOUTME: Semantic resolver and validator: id registry, reference resolution, structural rules
//! ABOUTME: Accumulates every problem found instead of stopping at the first

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use weft_core::{DomainTypeKind, PrimitiveType, Result, TypeRegistry, VarType, WeftError};

use crate::model::{
    self as dsl, AuthDef, ComponentList, CustomTypeDecl, DocumentRoot, ErrorMode, FlowDef,
    FlowMode, IndexDef, MemoryDef, ModelDef, PathSpec, Ref, SecretManagerDef, StepCardinality,
    StepCommon, StepDef, TelemetrySinkDef, ToolDef,
};
use crate::semantic;

/// Resolve a loaded document into the semantic model.
///
/// Returns the resolved application together with its custom type registry.
/// Every string reference in the result has been replaced with a direct
/// object pointer; failures carry the complete list of problems found.
pub fn resolve(root: &DocumentRoot) -> Result<(semantic::Application, TypeRegistry)> {
    let synthesized;
    let app = match root {
        DocumentRoot::Application(app) => app,
        DocumentRoot::Flow(flow) => {
            synthesized = dsl::Application {
                id: flow.id.clone(),
                flows: vec![flow.clone()],
                ..Default::default()
            };
            &synthesized
        }
        DocumentRoot::Agent(step) => {
            let common = step.common().cloned().unwrap_or_else(|| StepCommon::new(step.id()));
            synthesized = dsl::Application {
                id: step.id().to_string(),
                flows: vec![FlowDef {
                    id: format!("{}_flow", step.id()),
                    description: None,
                    mode: FlowMode::Chat,
                    steps: vec![Ref::Inline(step.clone())],
                    inputs: common.inputs.clone(),
                    outputs: common.outputs.clone(),
                }],
                ..Default::default()
            };
            &synthesized
        }
        DocumentRoot::List(list) => {
            synthesized = application_from_list(list);
            &synthesized
        }
    };
    Resolver::new().run(app)
}

fn application_from_list(list: &ComponentList) -> dsl::Application {
    let mut app = dsl::Application {
        id: "component_list".to_string(),
        ..Default::default()
    };
    match list {
        ComponentList::Auths(items) => app.auths = items.clone(),
        ComponentList::Indexes(items) => app.indexes = items.clone(),
        ComponentList::Models(items) => app.models = items.clone(),
        ComponentList::Tools(items) => app.tools = items.clone(),
        ComponentList::Types(items) => app.types = items.clone(),
        ComponentList::Variables(items) => app.variables = items.clone(),
    }
    app
}

/// One entry of the id lookup map. Identity (address) distinguishes a node
/// legally reached twice from two distinct nodes sharing an id:
/// structurally-equal-but-distinct instances still fail as duplicates.
#[derive(Clone, Copy)]
enum Node<'a> {
    Variable(&'a dsl::Variable),
    Type(&'a CustomTypeDecl),
    Model(&'a ModelDef),
    Memory(&'a MemoryDef),
    Auth(&'a AuthDef),
    Tool(&'a ToolDef),
    Index(&'a IndexDef),
    Flow(&'a FlowDef),
    Step(&'a StepDef),
    Telemetry(&'a TelemetrySinkDef),
    SecretManager(&'a SecretManagerDef),
}

impl<'a> Node<'a> {
    fn addr(self) -> usize {
        match self {
            Self::Variable(n) => n as *const _ as usize,
            Self::Type(n) => n as *const _ as usize,
            Self::Model(n) => n as *const _ as usize,
            Self::Memory(n) => n as *const _ as usize,
            Self::Auth(n) => n as *const _ as usize,
            Self::Tool(n) => n as *const _ as usize,
            Self::Index(n) => n as *const _ as usize,
            Self::Flow(n) => n as *const _ as usize,
            Self::Step(n) => n as *const _ as usize,
            Self::Telemetry(n) => n as *const _ as usize,
            Self::SecretManager(n) => n as *const _ as usize,
        }
    }

    fn kind(self) -> &'static str {
        match self {
            Self::Variable(_) => "variable",
            Self::Type(_) => "type",
            Self::Model(_) => "model",
            Self::Memory(_) => "memory",
            Self::Auth(_) => "auth",
            Self::Tool(_) => "tool",
            Self::Index(_) => "index",
            Self::Flow(_) => "flow",
            Self::Step(_) => "step",
            Self::Telemetry(_) => "telemetry",
            Self::SecretManager(_) => "secret_manager",
        }
    }

    fn json(self) -> String {
        fn dump<T: Serialize>(value: &T) -> String {
            serde_json::to_string(value).unwrap_or_else(|_| "<unserializable>".to_string())
        }
        match self {
            Self::Variable(n) => dump(n),
            Self::Type(n) => dump(n),
            Self::Model(n) => dump(n),
            Self::Memory(n) => dump(n),
            Self::Auth(n) => dump(n),
            Self::Tool(n) => dump(n),
            Self::Index(n) => dump(n),
            Self::Flow(n) => dump(n),
            Self::Step(n) => dump(n),
            Self::Telemetry(n) => dump(n),
            Self::SecretManager(n) => dump(n),
        }
    }
}

#[derive(Default)]
struct Resolver<'a> {
    registry: HashMap<String, Node<'a>>,
    resolution_issues: Vec<String>,
    validation_issues: Vec<String>,
    types: TypeRegistry,
    variables: HashMap<String, Arc<semantic::Variable>>,
    auths: HashMap<String, Arc<semantic::AuthProvider>>,
    models: HashMap<String, Arc<semantic::Model>>,
    memories: HashMap<String, Arc<semantic::Memory>>,
    tools: HashMap<String, Arc<semantic::Tool>>,
    indexes: HashMap<String, Arc<semantic::Index>>,
    flows: HashMap<String, Arc<semantic::Flow>>,
    flows_in_progress: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new() -> Self {
        Self::default()
    }

    fn run(mut self, app: &'a dsl::Application) -> Result<(semantic::Application, TypeRegistry)> {
        // Pass 1: id registry with embedded-object discovery.
        self.walk_application(app);

        // Custom types come from the registry so referenced documents
        // contribute declarations too.
        let declarations: Vec<(String, Option<String>, BTreeMap<String, String>)> = self
            .registry
            .values()
            .filter_map(|node| match node {
                Node::Type(decl) => Some((
                    decl.id.clone(),
                    decl.description.clone(),
                    decl.properties.clone(),
                )),
                _ => None,
            })
            .collect();
        match TypeRegistry::from_declarations(&declarations) {
            Ok(types) => self.types = types,
            Err(err) => self.resolution_issues.push(err.to_string()),
        }

        // Pass 2: reference resolution into the semantic model.
        let semantic_app = self.build_application(app);

        if !self.resolution_issues.is_empty() {
            return Err(WeftError::Resolution {
                issues: self.resolution_issues,
            });
        }

        // Pass 3: structural validation, accumulated.
        let semantic_app = semantic_app.ok_or_else(|| WeftError::internal("resolution produced no application"))?;
        self.validate(&semantic_app);
        if !self.validation_issues.is_empty() {
            return Err(WeftError::Validation {
                issues: self.validation_issues,
            });
        }

        debug!(
            app = %semantic_app.id,
            flows = semantic_app.flows.len(),
            components = self.registry.len(),
            "document resolved"
        );
        let types = semantic_app.types.clone();
        Ok((semantic_app, types))
    }

    // ---------------- pass 1: registry ----------------

    fn register(&mut self, id: &str, node: Node<'a>) {
        match self.registry.get(id).copied() {
            Some(existing) if existing.addr() == node.addr() => {}
            Some(existing) => self.resolution_issues.push(format!(
                "duplicate components with id '{id}':\n{}\nalready exists:\n{}",
                node.json(),
                existing.json()
            )),
            None => {
                self.registry.insert(id.to_string(), node);
            }
        }
    }

    fn walk_application(&mut self, app: &'a dsl::Application) {
        for decl in &app.types {
            self.register(&decl.id, Node::Type(decl));
        }
        for var in &app.variables {
            self.register(&var.id, Node::Variable(var));
        }
        for auth in &app.auths {
            self.walk_auth(auth);
        }
        for model in &app.models {
            self.walk_model(model);
        }
        for memory in &app.memories {
            self.register(&memory.id, Node::Memory(memory));
        }
        for tool in &app.tools {
            self.walk_tool(tool);
        }
        for index in &app.indexes {
            self.walk_index(index);
        }
        for flow in &app.flows {
            self.walk_flow(flow);
        }
        if let Some(sink) = &app.telemetry {
            self.register(&sink.id, Node::Telemetry(sink));
            self.walk_auth_ref(sink.auth.as_ref());
        }
        if let Some(manager) = &app.secret_manager {
            self.register(&manager.id, Node::SecretManager(manager));
            self.walk_auth_ref(manager.auth.as_ref());
        }
        for reference in &app.references {
            match reference {
                DocumentRoot::Application(inner) => self.walk_application(inner),
                DocumentRoot::Flow(flow) => self.walk_flow(flow),
                DocumentRoot::Agent(step) => self.walk_step(step),
                DocumentRoot::List(list) => self.walk_list(list),
            }
        }
    }

    fn walk_list(&mut self, list: &'a ComponentList) {
        match list {
            ComponentList::Auths(items) => items.iter().for_each(|a| self.walk_auth(a)),
            ComponentList::Indexes(items) => items.iter().for_each(|i| self.walk_index(i)),
            ComponentList::Models(items) => items.iter().for_each(|m| self.walk_model(m)),
            ComponentList::Tools(items) => items.iter().for_each(|t| self.walk_tool(t)),
            ComponentList::Types(items) => {
                items.iter().for_each(|t| self.register(&t.id, Node::Type(t)));
            }
            ComponentList::Variables(items) => items
                .iter()
                .for_each(|v| self.register(&v.id, Node::Variable(v))),
        }
    }

    fn walk_auth(&mut self, auth: &'a AuthDef) {
        self.register(auth.id(), Node::Auth(auth));
    }

    fn walk_auth_ref(&mut self, auth: Option<&'a Ref<AuthDef>>) {
        if let Some(Ref::Inline(auth)) = auth {
            self.walk_auth(auth);
        }
    }

    fn walk_model(&mut self, model: &'a ModelDef) {
        self.register(model.id(), Node::Model(model));
        self.walk_auth_ref(model.auth());
    }

    fn walk_model_ref(&mut self, model: &'a Ref<ModelDef>) {
        if let Ref::Inline(model) = model {
            self.walk_model(model);
        }
    }

    fn walk_tool(&mut self, tool: &'a ToolDef) {
        self.register(tool.id(), Node::Tool(tool));
        if let ToolDef::ApiTool { auth, .. } = tool {
            self.walk_auth_ref(auth.as_ref());
        }
    }

    fn walk_index(&mut self, index: &'a IndexDef) {
        self.register(index.id(), Node::Index(index));
        match index {
            IndexDef::VectorIndex {
                embedding_model,
                auth,
                ..
            } => {
                self.walk_model_ref(embedding_model);
                self.walk_auth_ref(auth.as_ref());
            }
            IndexDef::DocumentIndex { auth, .. } => self.walk_auth_ref(auth.as_ref()),
        }
    }

    fn walk_flow(&mut self, flow: &'a FlowDef) {
        self.register(&flow.id, Node::Flow(flow));
        self.walk_variable_refs(&flow.inputs);
        self.walk_variable_refs(&flow.outputs);
        for step in &flow.steps {
            if let Ref::Inline(step) = step {
                self.walk_step(step);
            }
        }
    }

    fn walk_variable_refs(&mut self, refs: &'a [Ref<dsl::Variable>]) {
        for var in refs {
            if let Ref::Inline(var) = var {
                self.register(&var.id, Node::Variable(var));
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn walk_step(&mut self, step: &'a StepDef) {
        if let StepDef::Flow(flow) = step {
            self.walk_flow(flow);
            return;
        }
        self.register(step.id(), Node::Step(step));
        if let Some(common) = step.common() {
            self.walk_variable_refs(&common.inputs);
            self.walk_variable_refs(&common.outputs);
        }
        match step {
            StepDef::LlmInference { model, memory, .. } => {
                self.walk_model_ref(model);
                if let Some(Ref::Inline(memory)) = memory {
                    self.register(&memory.id, Node::Memory(memory));
                }
            }
            StepDef::Agent {
                model,
                memory,
                tools,
                ..
            } => {
                self.walk_model_ref(model);
                if let Some(Ref::Inline(memory)) = memory {
                    self.register(&memory.id, Node::Memory(memory));
                }
                for tool in tools {
                    if let Ref::Inline(tool) = tool {
                        self.walk_tool(tool);
                    }
                }
            }
            StepDef::InvokeTool { tool, .. } => {
                if let Ref::Inline(tool) = tool {
                    self.walk_tool(tool);
                }
            }
            StepDef::InvokeFlow { flow, .. } => {
                if let Ref::Inline(flow) = flow {
                    self.walk_flow(flow);
                }
            }
            StepDef::DocumentEmbedder { model, .. } => self.walk_model_ref(model),
            StepDef::IndexUpsert { index, .. }
            | StepDef::VectorSearch { index, .. }
            | StepDef::DocumentSearch { index, .. } => {
                if let Ref::Inline(index) = index {
                    self.walk_index(index);
                }
            }
            StepDef::SqlSource { auth, .. } | StepDef::DocumentSource { auth, .. } => {
                self.walk_auth_ref(auth.as_ref());
            }
            StepDef::FileSource { path, .. } | StepDef::FileSink { path, .. } => {
                if let PathSpec::Variable(Ref::Inline(var)) = path {
                    self.register(&var.id, Node::Variable(var));
                }
            }
            _ => {}
        }
    }

    // ---------------- pass 2: reference resolution ----------------

    fn unresolved(&mut self, kind: &str, id: &str) {
        self.resolution_issues
            .push(format!("unresolved: {kind}:{id}"));
    }

    fn kind_mismatch(&mut self, expected: &str, id: &str, actual: &'static str) {
        self.resolution_issues.push(format!(
            "reference '{id}' expected a {expected} but found a {actual}"
        ));
    }

    fn lookup(&mut self, expected: &str, id: &str) -> Option<Node<'a>> {
        match self.registry.get(id).copied() {
            Some(node) if node.kind() == expected => Some(node),
            Some(node) => {
                self.kind_mismatch(expected, id, node.kind());
                None
            }
            None => {
                self.unresolved(expected, id);
                None
            }
        }
    }

    fn build_application(&mut self, app: &'a dsl::Application) -> Option<semantic::Application> {
        let variables = app
            .variables
            .iter()
            .filter_map(|v| self.build_variable(v))
            .collect();
        let auths = app
            .auths
            .iter()
            .filter_map(|a| self.build_auth(a))
            .collect();
        let models = app
            .models
            .iter()
            .filter_map(|m| self.build_model(m))
            .collect();
        let memories = app
            .memories
            .iter()
            .filter_map(|m| self.build_memory(m))
            .collect();
        let tools = app
            .tools
            .iter()
            .filter_map(|t| self.build_tool(t))
            .collect();
        let indexes = app
            .indexes
            .iter()
            .filter_map(|i| self.build_index(i))
            .collect();
        let flows: Vec<_> = app
            .flows
            .iter()
            .filter_map(|f| self.build_flow(f))
            .collect();
        let telemetry = app.telemetry.as_ref().map(|sink| {
            let auth = sink
                .auth
                .as_ref()
                .and_then(|auth| self.resolve_auth_ref(auth));
            Arc::new(semantic::TelemetrySink {
                id: sink.id.clone(),
                provider: sink.provider.clone(),
                endpoint: sink.endpoint.clone(),
                auth,
            })
        });
        let secret_manager = app.secret_manager.as_ref().map(|manager| {
            let auth = manager
                .auth
                .as_ref()
                .and_then(|auth| self.resolve_auth_ref(auth));
            Arc::new(semantic::SecretManagerConfig {
                id: manager.id.clone(),
                provider: manager.provider.clone(),
                auth,
            })
        });

        Some(semantic::Application {
            id: app.id.clone(),
            description: app.description.clone(),
            types: self.types.clone(),
            variables,
            models,
            memories,
            auths,
            tools,
            indexes,
            flows,
            telemetry,
            secret_manager,
        })
    }

    fn build_variable(&mut self, var: &dsl::Variable) -> Option<Arc<semantic::Variable>> {
        if let Some(existing) = self.variables.get(&var.id) {
            return Some(existing.clone());
        }
        let (ty, optional) = match self.types.resolve_string(&var.type_string) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.resolution_issues
                    .push(format!("variable '{}': {err}", var.id));
                (VarType::Primitive(PrimitiveType::Text), false)
            }
        };
        let built = Arc::new(semantic::Variable {
            id: var.id.clone(),
            ty,
            optional,
        });
        self.variables.insert(var.id.clone(), built.clone());
        Some(built)
    }

    fn resolve_variable_ref(&mut self, var: &Ref<dsl::Variable>) -> Option<Arc<semantic::Variable>> {
        match var {
            Ref::Inline(var) => self.build_variable(var),
            Ref::Ref { id } => {
                if let Some(existing) = self.variables.get(id) {
                    return Some(existing.clone());
                }
                match self.lookup("variable", id)? {
                    Node::Variable(var) => self.build_variable(var),
                    _ => None,
                }
            }
        }
    }

    fn build_auth(&mut self, auth: &AuthDef) -> Option<Arc<semantic::AuthProvider>> {
        if let Some(existing) = self.auths.get(auth.id()) {
            return Some(existing.clone());
        }
        let built = match auth.clone() {
            AuthDef::ApiKey { id, api_key, host } => {
                semantic::AuthProvider::ApiKey { id, api_key, host }
            }
            AuthDef::BearerToken { id, token } => semantic::AuthProvider::BearerToken { id, token },
            AuthDef::OAuth2 {
                id,
                client_id,
                client_secret,
                token_url,
                scopes,
            } => semantic::AuthProvider::OAuth2 {
                id,
                client_id,
                client_secret,
                token_url,
                scopes,
            },
            AuthDef::Cloud {
                id,
                access_key_id,
                secret_access_key,
                session_token,
                profile_name,
                role_arn,
                role_session_name,
                external_id,
                region,
            } => {
                let has_keys = access_key_id.is_some() && secret_access_key.is_some();
                let has_profile = profile_name.is_some();
                let has_role = role_arn.is_some();
                if !(has_keys || has_profile || has_role) {
                    self.validation_issues.push(format!(
                        "cloud auth '{id}' must specify access keys, a profile name, or a role ARN"
                    ));
                }
                if has_role && !(has_keys || has_profile) {
                    self.validation_issues.push(format!(
                        "cloud auth '{id}' role assumption requires base credentials (access keys or profile)"
                    ));
                }
                semantic::AuthProvider::Cloud {
                    id,
                    access_key_id,
                    secret_access_key,
                    session_token,
                    profile_name,
                    role_arn,
                    role_session_name,
                    external_id,
                    region,
                }
            }
        };
        let built = Arc::new(built);
        self.auths.insert(built.id().to_string(), built.clone());
        Some(built)
    }

    fn resolve_auth_ref(&mut self, auth: &Ref<AuthDef>) -> Option<Arc<semantic::AuthProvider>> {
        match auth {
            Ref::Inline(auth) => self.build_auth(auth),
            Ref::Ref { id } => {
                if let Some(existing) = self.auths.get(id) {
                    return Some(existing.clone());
                }
                match self.lookup("auth", id)? {
                    Node::Auth(auth) => self.build_auth(&auth.clone()),
                    _ => None,
                }
            }
        }
    }

    fn build_model(&mut self, model: &ModelDef) -> Option<Arc<semantic::Model>> {
        if let Some(existing) = self.models.get(model.id()) {
            return Some(existing.clone());
        }
        let (fields, dimensions) = match model {
            ModelDef::Model(fields) => (fields.clone(), None),
            ModelDef::EmbeddingModel(embedding) => {
                (embedding.base.clone(), Some(embedding.dimensions))
            }
        };
        let auth = fields
            .auth
            .as_ref()
            .and_then(|auth| self.resolve_auth_ref(auth));
        let built = Arc::new(semantic::Model {
            id: fields.id,
            provider: fields.provider,
            model_id: fields.model_id,
            inference_params: fields.inference_params,
            auth,
            dimensions,
        });
        self.models.insert(built.id.clone(), built.clone());
        Some(built)
    }

    fn resolve_model_ref(&mut self, model: &Ref<ModelDef>) -> Option<Arc<semantic::Model>> {
        match model {
            Ref::Inline(model) => self.build_model(model),
            Ref::Ref { id } => {
                if let Some(existing) = self.models.get(id) {
                    return Some(existing.clone());
                }
                match self.lookup("model", id)? {
                    Node::Model(model) => self.build_model(&model.clone()),
                    _ => None,
                }
            }
        }
    }

    fn build_memory(&mut self, memory: &MemoryDef) -> Option<Arc<semantic::Memory>> {
        if let Some(existing) = self.memories.get(&memory.id) {
            return Some(existing.clone());
        }
        let built = Arc::new(semantic::Memory {
            id: memory.id.clone(),
            token_limit: memory.token_limit,
            chat_history_token_ratio: memory.chat_history_token_ratio,
            token_flush_size: memory.token_flush_size,
        });
        self.memories.insert(memory.id.clone(), built.clone());
        Some(built)
    }

    fn resolve_memory_ref(&mut self, memory: &Ref<MemoryDef>) -> Option<Arc<semantic::Memory>> {
        match memory {
            Ref::Inline(memory) => self.build_memory(memory),
            Ref::Ref { id } => {
                if let Some(existing) = self.memories.get(id) {
                    return Some(existing.clone());
                }
                match self.lookup("memory", id)? {
                    Node::Memory(memory) => self.build_memory(&memory.clone()),
                    _ => None,
                }
            }
        }
    }

    fn build_tool_parameters(
        &mut self,
        tool_id: &str,
        params: &BTreeMap<String, dsl::ToolParameter>,
    ) -> BTreeMap<String, semantic::ToolParameter> {
        let mut out = BTreeMap::new();
        for (name, param) in params {
            match self.types.resolve_string(&param.type_string) {
                Ok((ty, type_optional)) => {
                    out.insert(
                        name.clone(),
                        semantic::ToolParameter {
                            ty,
                            optional: param.optional || type_optional,
                        },
                    );
                }
                Err(err) => self
                    .resolution_issues
                    .push(format!("tool '{tool_id}' parameter '{name}': {err}")),
            }
        }
        out
    }

    fn build_tool(&mut self, tool: &ToolDef) -> Option<Arc<semantic::Tool>> {
        if let Some(existing) = self.tools.get(tool.id()) {
            return Some(existing.clone());
        }
        let common = tool.common().clone();
        let inputs = self.build_tool_parameters(&common.id, &common.inputs);
        let outputs = self.build_tool_parameters(&common.id, &common.outputs);
        let spec = match tool {
            ToolDef::FunctionTool {
                module_path,
                function_name,
                ..
            } => semantic::ToolSpec::Function {
                module_path: module_path.clone(),
                function_name: function_name.clone(),
            },
            ToolDef::ApiTool {
                endpoint,
                method,
                headers,
                auth,
                ..
            } => semantic::ToolSpec::Api {
                endpoint: endpoint.clone(),
                method: method.clone(),
                headers: headers.clone(),
                auth: auth.as_ref().and_then(|auth| self.resolve_auth_ref(auth)),
            },
        };
        let built = Arc::new(semantic::Tool {
            id: common.id,
            name: common.name,
            description: common.description,
            inputs,
            outputs,
            spec,
        });
        self.tools.insert(built.id.clone(), built.clone());
        Some(built)
    }

    fn resolve_tool_ref(&mut self, tool: &Ref<ToolDef>) -> Option<Arc<semantic::Tool>> {
        match tool {
            Ref::Inline(tool) => self.build_tool(tool),
            Ref::Ref { id } => {
                if let Some(existing) = self.tools.get(id) {
                    return Some(existing.clone());
                }
                match self.lookup("tool", id)? {
                    Node::Tool(tool) => self.build_tool(&tool.clone()),
                    _ => None,
                }
            }
        }
    }

    fn build_index(&mut self, index: &IndexDef) -> Option<Arc<semantic::Index>> {
        if let Some(existing) = self.indexes.get(index.id()) {
            return Some(existing.clone());
        }
        let built = match index {
            IndexDef::VectorIndex {
                id,
                name,
                embedding_model,
                args,
                auth,
            } => {
                let model = self.resolve_model_ref(embedding_model)?;
                if !model.is_embedding() {
                    self.resolution_issues.push(format!(
                        "index '{id}' embedding_model '{}' is not an embedding model",
                        model.id
                    ));
                }
                semantic::Index {
                    id: id.clone(),
                    name: name.clone(),
                    args: args.clone(),
                    auth: auth.as_ref().and_then(|auth| self.resolve_auth_ref(auth)),
                    kind: semantic::IndexKind::Vector {
                        embedding_model: model,
                    },
                }
            }
            IndexDef::DocumentIndex {
                id,
                name,
                args,
                auth,
            } => semantic::Index {
                id: id.clone(),
                name: name.clone(),
                args: args.clone(),
                auth: auth.as_ref().and_then(|auth| self.resolve_auth_ref(auth)),
                kind: semantic::IndexKind::Document,
            },
        };
        let built = Arc::new(built);
        self.indexes.insert(built.id.clone(), built.clone());
        Some(built)
    }

    fn resolve_index_ref(&mut self, index: &Ref<IndexDef>) -> Option<Arc<semantic::Index>> {
        match index {
            Ref::Inline(index) => self.build_index(index),
            Ref::Ref { id } => {
                if let Some(existing) = self.indexes.get(id) {
                    return Some(existing.clone());
                }
                match self.lookup("index", id)? {
                    Node::Index(index) => self.build_index(&index.clone()),
                    _ => None,
                }
            }
        }
    }

    fn build_flow(&mut self, flow: &FlowDef) -> Option<Arc<semantic::Flow>> {
        if let Some(existing) = self.flows.get(&flow.id) {
            return Some(existing.clone());
        }
        if self.flows_in_progress.iter().any(|id| id == &flow.id) {
            self.resolution_issues.push(format!(
                "cyclic flow reference: {} -> {}",
                self.flows_in_progress.join(" -> "),
                flow.id
            ));
            return None;
        }
        self.flows_in_progress.push(flow.id.clone());

        let steps: Vec<Arc<semantic::Step>> = flow
            .steps
            .iter()
            .filter_map(|step| self.resolve_step_ref(step))
            .collect();
        let mut inputs: Vec<Arc<semantic::Variable>> = flow
            .inputs
            .iter()
            .filter_map(|var| self.resolve_variable_ref(var))
            .collect();
        let mut outputs: Vec<Arc<semantic::Variable>> = flow
            .outputs
            .iter()
            .filter_map(|var| self.resolve_variable_ref(var))
            .collect();
        // Unspecified flow interfaces are inferred from the first and last step.
        if inputs.is_empty() {
            if let Some(first) = steps.first() {
                inputs = first.inputs.clone();
            }
        }
        if outputs.is_empty() {
            if let Some(last) = steps.last() {
                outputs = last.outputs.clone();
            }
        }

        self.flows_in_progress.pop();
        let built = Arc::new(semantic::Flow {
            id: flow.id.clone(),
            description: flow.description.clone(),
            mode: flow.mode,
            steps,
            inputs,
            outputs,
        });
        self.flows.insert(flow.id.clone(), built.clone());
        Some(built)
    }

    fn resolve_flow_ref(&mut self, flow: &Ref<FlowDef>) -> Option<Arc<semantic::Flow>> {
        match flow {
            Ref::Inline(flow) => self.build_flow(flow),
            Ref::Ref { id } => {
                if let Some(existing) = self.flows.get(id) {
                    return Some(existing.clone());
                }
                if self.flows_in_progress.iter().any(|p| p == id) {
                    self.resolution_issues.push(format!(
                        "cyclic flow reference: {} -> {id}",
                        self.flows_in_progress.join(" -> ")
                    ));
                    return None;
                }
                match self.lookup("flow", id)? {
                    Node::Flow(flow) => self.build_flow(&flow.clone()),
                    _ => None,
                }
            }
        }
    }

    fn resolve_step_ref(&mut self, step: &Ref<StepDef>) -> Option<Arc<semantic::Step>> {
        match step {
            Ref::Inline(step) => self.build_step(step),
            Ref::Ref { id } => {
                if let Some(node) = self.registry.get(id).copied() {
                    match node {
                        Node::Step(step) => self.build_step(&step.clone()),
                        Node::Flow(flow) => {
                            let flow = self.build_flow(&flow.clone())?;
                            Some(Arc::new(flow_as_step(&flow)))
                        }
                        other => {
                            self.kind_mismatch("step", id, other.kind());
                            None
                        }
                    }
                } else {
                    self.unresolved("step", id);
                    None
                }
            }
        }
    }

    fn step_runtime(&self, common: &StepCommon, default_cardinality: StepCardinality) -> semantic::StepRuntime {
        semantic::StepRuntime {
            cardinality: common.cardinality.unwrap_or(default_cardinality),
            num_workers: common.concurrency.map_or(1, |c| c.num_workers.max(1)),
            batch_size: common.batch.map_or(1, |b| b.batch_size.max(1)),
            cache: common.cache.clone(),
            error_mode: common.error_mode.unwrap_or(ErrorMode::Drop),
            timeout: common.timeout_seconds.map(Duration::from_secs_f64),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn build_step(&mut self, step: &StepDef) -> Option<Arc<semantic::Step>> {
        if let StepDef::Flow(flow) = step {
            let flow = self.build_flow(flow)?;
            return Some(Arc::new(flow_as_step(&flow)));
        }
        let common = step.common()?.clone();
        let step_id = common.id.clone();
        let inputs: Vec<_> = common
            .inputs
            .iter()
            .filter_map(|var| self.resolve_variable_ref(var))
            .collect();
        let outputs: Vec<_> = common
            .outputs
            .iter()
            .filter_map(|var| self.resolve_variable_ref(var))
            .collect();

        let many_by_default = matches!(
            step,
            StepDef::FileSource { .. }
                | StepDef::SqlSource { .. }
                | StepDef::DocumentSource { .. }
                | StepDef::DocumentSplitter { .. }
                | StepDef::Explode { .. }
        );
        let runtime = self.step_runtime(
            &common,
            if many_by_default {
                StepCardinality::Many
            } else {
                StepCardinality::One
            },
        );

        let kind = match step {
            StepDef::PromptTemplate { template, path, .. } => {
                let source = match (template, path) {
                    (Some(template), None) => semantic::TemplateSource::Inline(template.clone()),
                    (None, Some(path)) => semantic::TemplateSource::Path(path.clone()),
                    _ => {
                        self.validation_issues.push(format!(
                            "prompt '{step_id}' must define exactly one of template or path"
                        ));
                        semantic::TemplateSource::Inline(template.clone().unwrap_or_default())
                    }
                };
                semantic::StepKind::PromptTemplate { template: source }
            }
            StepDef::LlmInference {
                model,
                system_message,
                memory,
                ..
            } => semantic::StepKind::LlmInference {
                model: self.resolve_model_ref(model)?,
                system_message: system_message.clone(),
                memory: memory
                    .as_ref()
                    .and_then(|memory| self.resolve_memory_ref(memory)),
            },
            StepDef::Agent {
                model,
                system_message,
                memory,
                tools,
                ..
            } => semantic::StepKind::Agent {
                model: self.resolve_model_ref(model)?,
                system_message: system_message.clone(),
                memory: memory
                    .as_ref()
                    .and_then(|memory| self.resolve_memory_ref(memory)),
                tools: tools
                    .iter()
                    .filter_map(|tool| self.resolve_tool_ref(tool))
                    .collect(),
            },
            StepDef::InvokeTool {
                tool,
                input_bindings,
                output_bindings,
                ..
            } => semantic::StepKind::InvokeTool {
                tool: self.resolve_tool_ref(tool)?,
                input_bindings: input_bindings.clone(),
                output_bindings: output_bindings.clone(),
            },
            StepDef::InvokeFlow {
                flow,
                input_bindings,
                output_bindings,
                ..
            } => semantic::StepKind::InvokeFlow {
                flow: self.resolve_flow_ref(flow)?,
                input_bindings: input_bindings.clone(),
                output_bindings: output_bindings.clone(),
            },
            StepDef::Decoder { format, .. } => semantic::StepKind::Decoder { format: *format },
            StepDef::Echo { .. } => semantic::StepKind::Echo,
            StepDef::Construct { field_bindings, .. } => semantic::StepKind::Construct {
                field_bindings: field_bindings.clone(),
            },
            StepDef::Explode { .. } => semantic::StepKind::Explode,
            StepDef::Collect { .. } => semantic::StepKind::Collect,
            StepDef::Aggregate { .. } => semantic::StepKind::Aggregate,
            StepDef::FieldExtractor { json_path, .. } => semantic::StepKind::FieldExtractor {
                json_path: json_path.clone(),
            },
            StepDef::FileSource { path, .. } => semantic::StepKind::FileSource {
                path: self.resolve_path(path)?,
            },
            StepDef::FileSink {
                path, error_dir, ..
            } => semantic::StepKind::FileSink {
                path: self.resolve_path(path)?,
                error_dir: error_dir.clone(),
            },
            StepDef::SqlSource {
                query,
                connection,
                auth,
                ..
            } => semantic::StepKind::SqlSource {
                query: query.clone(),
                connection: connection.clone(),
                auth: auth.as_ref().and_then(|auth| self.resolve_auth_ref(auth)),
            },
            StepDef::DocumentSource {
                reader, args, auth, ..
            } => semantic::StepKind::DocumentSource {
                reader: reader.clone(),
                args: args.clone(),
                auth: auth.as_ref().and_then(|auth| self.resolve_auth_ref(auth)),
            },
            StepDef::DocumentSplitter {
                splitter_name,
                chunk_size,
                chunk_overlap,
                ..
            } => semantic::StepKind::DocumentSplitter {
                splitter_name: splitter_name.clone(),
                chunk_size: *chunk_size,
                chunk_overlap: *chunk_overlap,
            },
            StepDef::DocumentEmbedder { model, .. } => semantic::StepKind::DocumentEmbedder {
                model: self.resolve_model_ref(model)?,
            },
            StepDef::IndexUpsert { index, .. } => semantic::StepKind::IndexUpsert {
                index: self.resolve_index_ref(index)?,
            },
            StepDef::VectorSearch {
                index,
                default_top_k,
                filters,
                ..
            } => semantic::StepKind::VectorSearch {
                index: self.resolve_index_ref(index)?,
                default_top_k: *default_top_k,
                filters: filters.clone(),
            },
            StepDef::DocumentSearch { index, filters, .. } => semantic::StepKind::DocumentSearch {
                index: self.resolve_index_ref(index)?,
                filters: filters.clone(),
            },
            StepDef::Flow(_) => unreachable!("handled above"),
        };

        Some(Arc::new(semantic::Step {
            id: step_id,
            runtime,
            inputs,
            outputs,
            kind,
        }))
    }

    fn resolve_path(&mut self, path: &PathSpec) -> Option<semantic::PathBinding> {
        match path {
            PathSpec::Constant { uri } => Some(semantic::PathBinding::Constant(uri.clone())),
            PathSpec::Variable(var) => self
                .resolve_variable_ref(var)
                .map(semantic::PathBinding::Variable),
        }
    }

    // ---------------- pass 3: structural validation ----------------

    fn validate(&mut self, app: &semantic::Application) {
        for tool in &app.tools {
            self.validate_tool(tool);
        }
        let mut seen_flows = HashSet::new();
        let flows: Vec<Arc<semantic::Flow>> = app.flows.clone();
        for flow in flows {
            self.validate_flow(&flow, &mut seen_flows);
        }
    }

    fn validate_tool(&mut self, tool: &semantic::Tool) {
        if tool.inputs.is_empty() {
            self.validation_issues
                .push(format!("tool '{}' defines no input schema", tool.id));
        }
        if tool.outputs.is_empty() {
            self.validation_issues
                .push(format!("tool '{}' defines no output schema", tool.id));
        }
    }

    fn validate_flow(&mut self, flow: &semantic::Flow, seen: &mut HashSet<String>) {
        if !seen.insert(flow.id.clone()) {
            return;
        }
        if flow.mode == FlowMode::Chat {
            let has_chat_input = flow
                .inputs
                .iter()
                .any(|var| matches!(var.ty, VarType::Domain(DomainTypeKind::ChatMessage)));
            if !has_chat_input {
                self.validation_issues.push(format!(
                    "chat flow '{}' declares no chat-message input for the user turn",
                    flow.id
                ));
            }
        }
        let mut step_ids = HashSet::new();
        for step in &flow.steps {
            if !step_ids.insert(step.id.clone()) {
                self.validation_issues.push(format!(
                    "step id '{}' appears twice in flow '{}'",
                    step.id, flow.id
                ));
            }
            self.validate_step(flow, step, seen);
        }
    }

    #[allow(clippy::too_many_lines)]
    fn validate_step(
        &mut self,
        flow: &semantic::Flow,
        step: &semantic::Step,
        seen: &mut HashSet<String>,
    ) {
        let input_ids: HashSet<&str> = step.inputs.iter().map(|v| v.id.as_str()).collect();
        match &step.kind {
            semantic::StepKind::PromptTemplate { template } => {
                if let semantic::TemplateSource::Inline(template) = template {
                    for placeholder in template_placeholders(template) {
                        if !input_ids.contains(placeholder.as_str()) {
                            self.validation_issues.push(format!(
                                "prompt '{}' references '{{{placeholder}}}' which is not a declared input",
                                step.id
                            ));
                        }
                    }
                }
                if step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "prompt '{}' must declare exactly one output",
                        step.id
                    ));
                }
            }
            semantic::StepKind::LlmInference { memory, .. }
            | semantic::StepKind::Agent { memory, .. } => {
                if step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "LLM step '{}' must declare exactly one output",
                        step.id
                    ));
                }
                if memory.is_some() && flow.mode == FlowMode::Complete {
                    self.validation_issues.push(format!(
                        "flow '{}' is in complete mode but step '{}' carries chat memory",
                        flow.id, step.id
                    ));
                }
            }
            semantic::StepKind::InvokeTool {
                tool,
                input_bindings,
                output_bindings,
            } => {
                for (param, var_id) in input_bindings {
                    if !tool.inputs.contains_key(param) {
                        self.validation_issues.push(format!(
                            "step '{}' binds unknown tool parameter '{param}'",
                            step.id
                        ));
                    }
                    if !input_ids.contains(var_id.as_str()) {
                        self.validation_issues.push(format!(
                            "step '{}' binds tool parameter '{param}' to undeclared input '{var_id}'",
                            step.id
                        ));
                    }
                }
                let output_ids: HashSet<&str> =
                    step.outputs.iter().map(|v| v.id.as_str()).collect();
                for (param, var_id) in output_bindings {
                    if !tool.outputs.contains_key(param) {
                        self.validation_issues.push(format!(
                            "step '{}' extracts unknown tool output '{param}'",
                            step.id
                        ));
                    }
                    if !output_ids.contains(var_id.as_str()) {
                        self.validation_issues.push(format!(
                            "step '{}' extracts tool output '{param}' into undeclared output '{var_id}'",
                            step.id
                        ));
                    }
                }
            }
            semantic::StepKind::InvokeFlow { flow: target, .. } => {
                self.validate_flow(target, seen);
            }
            semantic::StepKind::Echo => {
                if step.inputs.len() != step.outputs.len() {
                    self.validation_issues.push(format!(
                        "echo step '{}' must declare matching inputs and outputs",
                        step.id
                    ));
                }
            }
            semantic::StepKind::Construct { field_bindings } => {
                if step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "construct step '{}' must declare exactly one output",
                        step.id
                    ));
                    return;
                }
                let output = &step.outputs[0];
                match &output.ty {
                    VarType::Custom(def) => {
                        for field in field_bindings.keys() {
                            if !def.properties.contains_key(field) {
                                self.validation_issues.push(format!(
                                    "construct step '{}' binds unknown field '{field}' of type '{}'",
                                    step.id, def.id
                                ));
                            }
                        }
                        for (field, var_id) in field_bindings {
                            if !input_ids.contains(var_id.as_str()) {
                                self.validation_issues.push(format!(
                                    "construct step '{}' binds field '{field}' to undeclared input '{var_id}'",
                                    step.id
                                ));
                            }
                        }
                    }
                    VarType::List(_) | VarType::Primitive(_) => {
                        if step.inputs.len() != 1 {
                            self.validation_issues.push(format!(
                                "construct step '{}' must have a single input or a custom-typed output",
                                step.id
                            ));
                        }
                    }
                    VarType::Domain(_) => {}
                }
            }
            semantic::StepKind::Explode => {
                let list_input = step
                    .inputs
                    .first()
                    .is_some_and(|var| matches!(var.ty, VarType::List(_)));
                if step.inputs.len() != 1 || !list_input {
                    self.validation_issues.push(format!(
                        "explode step '{}' requires a single list-typed input",
                        step.id
                    ));
                }
                if step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "explode step '{}' must declare exactly one output",
                        step.id
                    ));
                }
            }
            semantic::StepKind::FieldExtractor { .. } => {
                if step.inputs.len() != 1 || step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "field extractor step '{}' requires one input and one output",
                        step.id
                    ));
                }
            }
            semantic::StepKind::DocumentSplitter { .. }
            | semantic::StepKind::DocumentEmbedder { .. } => {
                if step.inputs.len() != 1 || step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "step '{}' requires one input and one output",
                        step.id
                    ));
                }
            }
            semantic::StepKind::DocumentSource { .. } => {
                if step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "document source step '{}' must declare exactly one output",
                        step.id
                    ));
                }
            }
            semantic::StepKind::IndexUpsert { .. } => {
                if step.inputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "index upsert step '{}' must declare exactly one input",
                        step.id
                    ));
                }
            }
            semantic::StepKind::FileSource { .. } | semantic::StepKind::SqlSource { .. } => {
                if step.outputs.is_empty() {
                    self.validation_issues.push(format!(
                        "source step '{}' declares no outputs",
                        step.id
                    ));
                }
            }
            semantic::StepKind::Collect => {
                let list_output = step
                    .outputs
                    .first()
                    .is_some_and(|var| matches!(var.ty, VarType::List(_)));
                if step.outputs.len() != 1 || !list_output {
                    self.validation_issues.push(format!(
                        "collect step '{}' requires a single list-typed output",
                        step.id
                    ));
                }
            }
            semantic::StepKind::Decoder { .. } => {
                if step.inputs.len() != 1 || step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "decoder step '{}' requires a single string input and one output",
                        step.id
                    ));
                }
            }
            semantic::StepKind::VectorSearch { index, .. } => {
                if !matches!(index.kind, semantic::IndexKind::Vector { .. }) {
                    self.validation_issues.push(format!(
                        "vector search step '{}' targets non-vector index '{}'",
                        step.id, index.id
                    ));
                }
                if step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "search step '{}' must declare exactly one output",
                        step.id
                    ));
                }
            }
            semantic::StepKind::DocumentSearch { index, .. } => {
                if !matches!(index.kind, semantic::IndexKind::Document) {
                    self.validation_issues.push(format!(
                        "document search step '{}' targets non-document index '{}'",
                        step.id, index.id
                    ));
                }
                if step.outputs.len() != 1 {
                    self.validation_issues.push(format!(
                        "search step '{}' must declare exactly one output",
                        step.id
                    ));
                }
            }
            semantic::StepKind::Flow(inner) => {
                self.validate_flow(inner, seen);
            }
            _ => {}
        }
    }
}

/// A nested flow used where a step is expected.
fn flow_as_step(flow: &Arc<semantic::Flow>) -> semantic::Step {
    semantic::Step {
        id: flow.id.clone(),
        runtime: semantic::StepRuntime::default(),
        inputs: flow.inputs.clone(),
        outputs: flow.outputs.clone(),
        kind: semantic::StepKind::Flow(flow.clone()),
    }
}

/// `{placeholder}` tokens of a prompt template.
fn template_placeholders(template: &str) -> Vec<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid pattern"));
    pattern
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_yaml(yaml: &str) -> Result<(semantic::Application, TypeRegistry)> {
        let root: DocumentRoot = serde_yaml::from_str(yaml).unwrap();
        resolve(&root)
    }

    #[test]
    fn test_simple_application_resolves() {
        let (app, _types) = resolve_yaml(
            r"
id: demo
variables:
  - id: question
    type: text
  - id: answer
    type: text
flows:
  - id: main
    steps:
      - type: Echo
        id: pass
        inputs: [question]
        outputs: [question]
",
        )
        .unwrap();
        assert_eq!(app.flows.len(), 1);
        let flow = &app.flows[0];
        assert_eq!(flow.steps[0].kind_name(), "Echo");
        // Inferred interface comes from the first/last step.
        assert_eq!(flow.inputs[0].id, "question");
    }

    #[test]
    fn test_duplicate_ids_fail_with_both_serializations() {
        let err = resolve_yaml(
            r"
id: demo
variables:
  - id: dup
    type: text
  - id: dup
    type: int
",
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("duplicate components with id 'dup'"));
        assert!(text.contains("text"));
        assert!(text.contains("int"));
    }

    #[test]
    fn test_unresolved_reference_reports_kind_and_id() {
        let err = resolve_yaml(
            r"
id: demo
flows:
  - id: main
    steps:
      - type: Echo
        id: pass
        inputs: [ghost]
        outputs: [ghost]
",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unresolved: variable:ghost"));
    }

    #[test]
    fn test_all_resolution_errors_accumulate() {
        let err = resolve_yaml(
            r"
id: demo
flows:
  - id: main
    steps:
      - type: Echo
        id: pass
        inputs: [ghost_one]
        outputs: [ghost_two]
",
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("ghost_one"));
        assert!(text.contains("ghost_two"));
    }

    #[test]
    fn test_embedded_object_registered_and_referencable() {
        let (app, _) = resolve_yaml(
            r"
id: demo
flows:
  - id: main
    steps:
      - type: LLMInference
        id: infer
        model:
          type: Model
          id: gpt
          provider: openai
        inputs:
          - id: prompt
            type: text
        outputs:
          - id: reply
            type: text
      - type: LLMInference
        id: infer_again
        model: gpt
        inputs: [prompt]
        outputs:
          - id: reply_two
            type: text
",
        )
        .unwrap();
        let flow = &app.flows[0];
        let (first_model, second_model) = match (&flow.steps[0].kind, &flow.steps[1].kind) {
            (
                semantic::StepKind::LlmInference { model: a, .. },
                semantic::StepKind::LlmInference { model: b, .. },
            ) => (a, b),
            _ => panic!("expected llm steps"),
        };
        // Both steps share the same resolved descriptor.
        assert!(Arc::ptr_eq(first_model, second_model));
    }

    #[test]
    fn test_cyclic_flow_reference_fails() {
        let err = resolve_yaml(
            r"
id: demo
variables:
  - id: x
    type: text
flows:
  - id: flow_a
    steps:
      - type: InvokeFlow
        id: call_b
        flow: flow_b
        inputs: [x]
        outputs: [x]
  - id: flow_b
    steps:
      - type: InvokeFlow
        id: call_a
        flow: flow_a
        inputs: [x]
        outputs: [x]
",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cyclic flow reference"));
    }

    #[test]
    fn test_prompt_placeholder_must_be_declared_input() {
        let err = resolve_yaml(
            r"
id: demo
variables:
  - id: question
    type: text
  - id: prompt
    type: text
flows:
  - id: main
    steps:
      - type: PromptTemplate
        id: render
        template: 'Answer {question} about {topic}'
        inputs: [question]
        outputs: [prompt]
",
        )
        .unwrap_err();
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn test_prompt_template_xor_path() {
        let err = resolve_yaml(
            r"
id: demo
variables:
  - id: q
    type: text
  - id: p
    type: text
flows:
  - id: main
    steps:
      - type: PromptTemplate
        id: render
        template: 'hi {q}'
        path: prompts/hi.txt
        inputs: [q]
        outputs: [p]
",
        )
        .unwrap_err();
        assert!(err.to_string().contains("exactly one of template or path"));
    }

    #[test]
    fn test_complete_mode_rejects_memory() {
        let err = resolve_yaml(
            r"
id: demo
memories:
  - id: chat_mem
models:
  - type: Model
    id: gpt
    provider: openai
variables:
  - id: prompt
    type: text
  - id: reply
    type: text
flows:
  - id: main
    mode: Complete
    steps:
      - type: LLMInference
        id: infer
        model: gpt
        memory: chat_mem
        inputs: [prompt]
        outputs: [reply]
",
        )
        .unwrap_err();
        assert!(err.to_string().contains("complete mode"));
    }

    #[test]
    fn test_chat_mode_requires_chat_input() {
        let err = resolve_yaml(
            r"
id: demo
models:
  - type: Model
    id: gpt
    provider: openai
variables:
  - id: prompt
    type: text
  - id: reply
    type: text
flows:
  - id: main
    mode: Chat
    inputs: [prompt]
    outputs: [reply]
    steps:
      - type: LLMInference
        id: infer
        model: gpt
        inputs: [prompt]
        outputs: [reply]
",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chat-message input"));
    }

    #[test]
    fn test_optional_variable_type_resolves() {
        let (app, _) = resolve_yaml(
            r"
id: demo
variables:
  - id: maybe
    type: 'text?'
",
        )
        .unwrap();
        assert!(app.variables[0].optional);
        assert_eq!(app.variables[0].ty, VarType::Primitive(PrimitiveType::Text));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let yaml = r"
id: demo
variables:
  - id: a
    type: list[int]
flows:
  - id: main
    steps:
      - type: Explode
        id: fan
        inputs: [a]
        outputs:
          - id: item
            type: int
";
        let (first, _) = resolve_yaml(yaml).unwrap();
        let (second, _) = resolve_yaml(yaml).unwrap();
        assert_eq!(first.flows[0], second.flows[0]);
    }

    #[test]
    fn test_search_index_kind_agreement() {
        let err = resolve_yaml(
            r"
id: demo
indexes:
  - type: DocumentIndex
    id: docs
    name: docs
variables:
  - id: query
    type: text
  - id: hits
    type: list[SearchResult]
flows:
  - id: main
    steps:
      - type: VectorSearch
        id: search
        index: docs
        inputs: [query]
        outputs: [hits]
",
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-vector index"));
    }

    #[test]
    fn test_tool_schema_required() {
        let err = resolve_yaml(
            r"
id: demo
tools:
  - type: FunctionTool
    id: no_schema
    name: no_schema
    description: does nothing
    module_path: builtins
    function_name: noop
",
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("no input schema"));
        assert!(text.contains("no output schema"));
    }
}
