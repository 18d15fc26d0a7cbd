//! ABOUTME: Runtime context bundle threaded through the execution pipeline
//! ABOUTME: Secrets, tracer, callbacks, adapter factories, cancellation, and run state

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use weft_core::{ChatMessage, WeftError};

use crate::adapters::embedding::{EmbeddingFactory, OpenAiCompatibleEmbeddingFactory};
use crate::adapters::functions::FunctionRegistry;
use crate::adapters::index::{HttpIndexClientFactory, IndexClientFactory};
use crate::adapters::llm::{LanguageModelFactory, OpenAiCompatibleFactory};
use crate::adapters::readers::ReaderRegistry;
use crate::auth::{AuthManager, CloudSessionBroker, StaticCloudBroker};
use crate::emitter::StreamCallback;
use crate::progress::ProgressSnapshot;
use crate::secrets::{NoopSecretManager, SecretManager};
use crate::telemetry::{Tracer, TracingTracer};

/// Callback receiving progress snapshots after every emitted message.
pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Per-session chat memory, mutated only by the LLM executor and serialized
/// against concurrent access within one session.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Arc<tokio::sync::Mutex<Vec<ChatMessage>>>>,
}

impl MemoryStore {
    /// The memory slot for one `(session, memory)` pair.
    #[must_use]
    pub fn slot(
        &self,
        session_id: &str,
        memory_id: &str,
    ) -> Arc<tokio::sync::Mutex<Vec<ChatMessage>>> {
        self.entries
            .entry(format!("{session_id}::{memory_id}"))
            .or_default()
            .clone()
    }
}

#[derive(Default)]
struct RunState {
    error: Mutex<Option<WeftError>>,
    abort: CancellationToken,
}

/// Cross-cutting concerns shared by every executor of one run.
///
/// Cloning is cheap; all members are shared handles. Executor-specific
/// dependencies (adapters, clients) come out of the factories so they are
/// created lazily and cached per descriptor.
#[derive(Clone)]
pub struct ExecutorContext {
    pub secrets: Arc<dyn SecretManager>,
    pub tracer: Arc<dyn Tracer>,
    pub on_stream_event: Option<StreamCallback>,
    pub on_progress: Option<ProgressCallback>,
    pub http: reqwest::Client,
    pub auth: Arc<AuthManager>,
    pub llm_factory: Arc<dyn LanguageModelFactory>,
    pub embedding_factory: Arc<dyn EmbeddingFactory>,
    pub index_factory: Arc<dyn IndexClientFactory>,
    pub functions: Arc<FunctionRegistry>,
    pub readers: Arc<ReaderRegistry>,
    pub memory: Arc<MemoryStore>,
    pub cancellation: CancellationToken,
    run: Arc<RunState>,
}

impl Default for ExecutorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorContext {
    #[must_use]
    pub fn new() -> Self {
        let http = reqwest::Client::new();
        let secrets: Arc<dyn SecretManager> = Arc::new(NoopSecretManager);
        let broker: Arc<dyn CloudSessionBroker> = Arc::new(StaticCloudBroker);
        Self {
            auth: Arc::new(AuthManager::new(secrets.clone(), broker)),
            secrets,
            tracer: Arc::new(TracingTracer),
            on_stream_event: None,
            on_progress: None,
            llm_factory: Arc::new(OpenAiCompatibleFactory::new(http.clone())),
            embedding_factory: Arc::new(OpenAiCompatibleEmbeddingFactory::new(http.clone())),
            index_factory: Arc::new(HttpIndexClientFactory::new(http.clone())),
            http,
            functions: Arc::new(FunctionRegistry::new()),
            readers: Arc::new(ReaderRegistry::with_builtins()),
            memory: Arc::new(MemoryStore::default()),
            cancellation: CancellationToken::new(),
            run: Arc::new(RunState::default()),
        }
    }

    #[must_use]
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretManager>) -> Self {
        self.auth = Arc::new(AuthManager::new(secrets.clone(), Arc::new(StaticCloudBroker)));
        self.secrets = secrets;
        self
    }

    #[must_use]
    pub fn with_cloud_broker(mut self, broker: Arc<dyn CloudSessionBroker>) -> Self {
        self.auth = Arc::new(AuthManager::new(self.secrets.clone(), broker));
        self
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn with_stream_callback(mut self, callback: StreamCallback) -> Self {
        self.on_stream_event = Some(callback);
        self
    }

    #[must_use]
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    #[must_use]
    pub fn with_llm_factory(mut self, factory: Arc<dyn LanguageModelFactory>) -> Self {
        self.llm_factory = factory;
        self
    }

    #[must_use]
    pub fn with_embedding_factory(mut self, factory: Arc<dyn EmbeddingFactory>) -> Self {
        self.embedding_factory = factory;
        self
    }

    #[must_use]
    pub fn with_index_factory(mut self, factory: Arc<dyn IndexClientFactory>) -> Self {
        self.index_factory = factory;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// A context sharing every handle but with a fresh run state, for
    /// nested flow invocations.
    #[must_use]
    pub fn child_run(&self) -> Self {
        let mut child = self.clone();
        child.run = Arc::new(RunState {
            error: Mutex::new(None),
            abort: self.run.abort.child_token(),
        });
        child
    }

    /// Record a fatal run error (error mode `Fail`); the first one wins.
    pub fn record_run_error(&self, error: WeftError) {
        let mut slot = self.run.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.run.abort.cancel();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.run.abort.is_cancelled() || self.cancellation.is_cancelled()
    }

    #[must_use]
    pub fn take_run_error(&self) -> Option<WeftError> {
        self.run.error.lock().take()
    }
}
