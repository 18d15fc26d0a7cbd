//! ABOUTME: Streaming execution engine for weft flows
//! ABOUTME: Executor framework, canonical executors, flow runner, wire converter, secrets/auth, telemetry
//!
//! A flow run is a chain of [`executor::execute_step`] stages over a lazy
//! message stream: each step filters failed messages aside, fans work out to
//! a bounded worker pool, consults its cache, tracks progress, and drains a
//! finalize hook — then the next stage consumes its output. [`flow::run_flow`]
//! builds the chain and collects the final messages.

pub mod adapters;
pub mod auth;
pub mod cache;
pub mod context;
pub mod emitter;
pub mod executor;
pub mod executors;
pub mod factory;
pub mod flow;
pub mod progress;
pub mod secrets;
pub mod splitter;
pub mod stream;
pub mod tabular;
pub mod telemetry;

pub use context::ExecutorContext;
pub use emitter::{StreamCallback, StreamEmitter};
pub use executor::{execute_step, BatchedStepExecutor, ExecutorKind, MessageStream, StepExecutor};
pub use factory::create_executor;
pub use flow::run_flow;
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use secrets::{NoopSecretManager, SecretManager, StaticSecretManager};
pub use stream::{Chunk, StreamEventConverter};
pub use telemetry::{SpanKind, Tracer};
