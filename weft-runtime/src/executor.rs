//! ABOUTME: Step executor contract and the staged streaming pipeline
//! ABOUTME: Filter failed, prepare, fan out workers, cache, track progress, finalize

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tracing::warn;

use weft_core::{FlowMessage, Result, WeftError};
use weft_dsl::model::ErrorMode;
use weft_dsl::semantic::Step;

use crate::cache::{capture_outcome, rebuild_outcome, StepCache};
use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::progress::ProgressTracker;
use crate::telemetry::{SpanHandle, SpanKind};

/// A lazily produced, ordered sequence of messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = FlowMessage> + Send>>;

/// Wrap messages into a stream.
pub fn message_stream(messages: Vec<FlowMessage>) -> MessageStream {
    Box::pin(futures::stream::iter(messages))
}

/// A step executor processing one message at a time.
///
/// `process_message` is one-to-many: an input may yield zero, one, or many
/// outputs. Failed inputs never reach it; the pipeline re-emits them at the
/// end of the step. Returning an error marks the input failed (or aborts the
/// run under error mode `Fail`).
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn step(&self) -> &Arc<Step>;

    fn span_kind(&self) -> SpanKind {
        SpanKind::Generic
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>>;

    /// Observe the failed messages that bypassed this step, before they are
    /// re-emitted. Sinks use this to persist error records.
    async fn handle_failed(&self, _failed: &[FlowMessage]) -> Result<()> {
        Ok(())
    }

    /// Called once after the input stream is exhausted; emitted messages are
    /// appended to the output stream (aggregators, collectors, file writers).
    async fn finalize(
        &self,
        _emitter: &StreamEmitter,
        _progress: &ProgressTracker,
    ) -> Result<Vec<FlowMessage>> {
        Ok(Vec::new())
    }
}

/// A step executor processing fixed-size batches, for steps that benefit
/// from vectorized calls (embedding, bulk index upserts).
#[async_trait]
pub trait BatchedStepExecutor: Send + Sync {
    fn step(&self) -> &Arc<Step>;

    fn span_kind(&self) -> SpanKind {
        SpanKind::Generic
    }

    async fn process_batch(
        &self,
        batch: Vec<FlowMessage>,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>>;

    async fn handle_failed(&self, _failed: &[FlowMessage]) -> Result<()> {
        Ok(())
    }

    async fn finalize(
        &self,
        _emitter: &StreamEmitter,
        _progress: &ProgressTracker,
    ) -> Result<Vec<FlowMessage>> {
        Ok(Vec::new())
    }
}

/// A concrete executor, per-message or batched.
#[derive(Clone)]
pub enum ExecutorKind {
    PerMessage(Arc<dyn StepExecutor>),
    PerBatch(Arc<dyn BatchedStepExecutor>),
}

impl ExecutorKind {
    #[must_use]
    pub fn step(&self) -> &Arc<Step> {
        match self {
            Self::PerMessage(executor) => executor.step(),
            Self::PerBatch(executor) => executor.step(),
        }
    }

    #[must_use]
    pub fn span_kind(&self) -> SpanKind {
        match self {
            Self::PerMessage(executor) => executor.span_kind(),
            Self::PerBatch(executor) => executor.span_kind(),
        }
    }

    async fn handle_failed(&self, failed: &[FlowMessage]) -> Result<()> {
        match self {
            Self::PerMessage(executor) => executor.handle_failed(failed).await,
            Self::PerBatch(executor) => executor.handle_failed(failed).await,
        }
    }

    async fn finalize(
        &self,
        emitter: &StreamEmitter,
        progress: &ProgressTracker,
    ) -> Result<Vec<FlowMessage>> {
        match self {
            Self::PerMessage(executor) => executor.finalize(emitter, progress).await,
            Self::PerBatch(executor) => executor.finalize(emitter, progress).await,
        }
    }
}

enum WorkItem {
    Single(FlowMessage),
    Batch(Vec<FlowMessage>),
}

/// Drive one step over an input stream.
///
/// The pipeline: failed inputs are buffered and re-emitted after successes
/// (no ordering guarantee between the two); valid messages are prepared
/// (chunked for batched executors) and processed by up to `num_workers`
/// concurrent invocations — with more than one worker, output order is
/// unspecified. Each invocation opens a telemetry span whose ids land in the
/// output metadata, consults the step cache when configured, and updates the
/// progress tracker per emitted message. `finalize` output is drained last.
pub fn execute_step(kind: ExecutorKind, ctx: ExecutorContext, input: MessageStream) -> MessageStream {
    let step = kind.step().clone();
    let tracker = Arc::new(ProgressTracker::new(step.id.clone()));
    let emitter = StreamEmitter::new(step.id.clone(), ctx.on_stream_event.clone());

    let cache = match (&step.runtime.cache, &kind) {
        (Some(config), ExecutorKind::PerMessage(_)) => match StepCache::open(config, &step.id) {
            Ok(opened) => Some(Arc::new(opened)),
            Err(error) => {
                ctx.record_run_error(error);
                None
            }
        },
        _ => None,
    };

    let failed: Arc<Mutex<Vec<FlowMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let failed_sink = failed.clone();
    let valid = input.filter_map(move |message| {
        let kept = if message.is_failed() {
            failed_sink.lock().push(message);
            None
        } else {
            Some(message)
        };
        futures::future::ready(kept)
    });

    let prepared: BoxStream<'static, WorkItem> = match &kind {
        ExecutorKind::PerMessage(_) => valid.map(WorkItem::Single).boxed(),
        ExecutorKind::PerBatch(_) => valid
            .chunks(step.runtime.batch_size)
            .map(WorkItem::Batch)
            .boxed(),
    };

    let worker = {
        let kind = kind.clone();
        let ctx = ctx.clone();
        let tracker = tracker.clone();
        let emitter = emitter.clone();
        let cache = cache.clone();
        let step = step.clone();
        move |item: WorkItem| {
            let kind = kind.clone();
            let ctx = ctx.clone();
            let tracker = tracker.clone();
            let emitter = emitter.clone();
            let cache = cache.clone();
            let step = step.clone();
            async move { process_item(&kind, &ctx, &tracker, &emitter, cache.as_deref(), &step, item).await }
        }
    };
    let processed = prepared
        .map(worker)
        .buffer_unordered(step.runtime.num_workers)
        .flat_map(futures::stream::iter);

    let out = async_stream::stream! {
        futures::pin_mut!(processed);
        while let Some(message) = processed.next().await {
            tracker.record_message(&message);
            notify_progress(&ctx, &tracker);
            yield message;
        }

        let drained: Vec<FlowMessage> = std::mem::take(&mut *failed.lock());
        if !drained.is_empty() {
            if let Err(error) = kind.handle_failed(&drained).await {
                warn!(step = %step.id, %error, "failed-message hook errored");
            }
            for message in drained {
                tracker.record_message(&message);
                notify_progress(&ctx, &tracker);
                yield message;
            }
        }

        if !ctx.is_aborted() {
            match kind.finalize(&emitter, &tracker).await {
                Ok(messages) => {
                    for message in messages {
                        yield message;
                    }
                }
                Err(error) => {
                    emitter.error(error.to_string());
                    ctx.record_run_error(error);
                }
            }
        }
    };
    Box::pin(out)
}

fn notify_progress(ctx: &ExecutorContext, tracker: &ProgressTracker) {
    if let Some(callback) = &ctx.on_progress {
        callback(tracker.snapshot());
    }
}

fn with_span(message: FlowMessage, span: &SpanHandle) -> FlowMessage {
    message
        .with_metadata("span_id", json!(span.span_id))
        .with_metadata("trace_id", json!(span.trace_id))
}

async fn run_with_timeout<F>(
    timeout: Option<Duration>,
    step_id: &str,
    future: F,
) -> Result<Vec<FlowMessage>>
where
    F: Future<Output = Result<Vec<FlowMessage>>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| WeftError::step(step_id, format!("timed out after {limit:?}")))?,
        None => future.await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_item(
    kind: &ExecutorKind,
    ctx: &ExecutorContext,
    tracker: &ProgressTracker,
    emitter: &StreamEmitter,
    cache: Option<&StepCache>,
    step: &Arc<Step>,
    item: WorkItem,
) -> Vec<FlowMessage> {
    if ctx.is_aborted() {
        return Vec::new();
    }

    // One span per invocation, not per step, so feedback can address the
    // exact message output.
    let span = ctx.tracer.start_span(
        &format!("{}.process", step.id),
        &[
            ("step.id", step.id.clone()),
            ("step.type", step.kind_name().to_string()),
            ("span.kind", kind.span_kind().as_str().to_string()),
        ],
    );
    let emitter = emitter.clone().with_metadata(HashMap::from([
        ("span_id".to_string(), json!(span.span_id)),
        ("trace_id".to_string(), json!(span.trace_id)),
    ]));

    match item {
        WorkItem::Single(message) => {
            let key = cache.map(|_| message.fingerprint());
            if let (Some(cache), Some(key)) = (cache, &key) {
                match cache.lookup(key) {
                    Ok(Some(outcome)) => {
                        tracker.record_cache_hit();
                        return rebuild_outcome(&outcome, &message)
                            .into_iter()
                            .map(|output| with_span(output, &span))
                            .collect();
                    }
                    Ok(None) => tracker.record_cache_miss(),
                    Err(error) => {
                        warn!(step = %step.id, %error, "cache lookup failed");
                        tracker.record_cache_miss();
                    }
                }
            }

            let ExecutorKind::PerMessage(executor) = kind else {
                return Vec::new();
            };
            let work = run_with_timeout(
                step.runtime.timeout,
                &step.id,
                executor.process_message(message.clone(), &emitter),
            );
            let result = tokio::select! {
                result = work => result,
                () = ctx.cancellation.cancelled() => return Vec::new(),
            };
            match result {
                Ok(outputs) => {
                    let outputs: Vec<FlowMessage> = outputs
                        .into_iter()
                        .map(|output| with_span(output, &span))
                        .collect();
                    if let (Some(cache), Some(key)) = (cache, &key) {
                        if let Err(error) = cache.store(key, &capture_outcome(&outputs)) {
                            warn!(step = %step.id, %error, "cache store failed");
                        }
                    }
                    outputs
                }
                Err(error) => {
                    handle_error(ctx, step, &emitter, &span, &error, &[message], cache, key.as_deref())
                }
            }
        }
        WorkItem::Batch(batch) => {
            let ExecutorKind::PerBatch(executor) = kind else {
                return Vec::new();
            };
            let work = run_with_timeout(
                step.runtime.timeout,
                &step.id,
                executor.process_batch(batch.clone(), &emitter),
            );
            let result = tokio::select! {
                result = work => result,
                () = ctx.cancellation.cancelled() => return Vec::new(),
            };
            match result {
                Ok(outputs) => outputs
                    .into_iter()
                    .map(|output| with_span(output, &span))
                    .collect(),
                Err(error) => handle_error(ctx, step, &emitter, &span, &error, &batch, None, None),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_error(
    ctx: &ExecutorContext,
    step: &Arc<Step>,
    emitter: &StreamEmitter,
    span: &SpanHandle,
    error: &WeftError,
    inputs: &[FlowMessage],
    cache: Option<&StepCache>,
    key: Option<&str>,
) -> Vec<FlowMessage> {
    emitter.error(error.to_string());
    match step.runtime.error_mode {
        ErrorMode::Fail => {
            ctx.record_run_error(WeftError::step(&step.id, error.to_string()));
            Vec::new()
        }
        ErrorMode::Drop => inputs
            .iter()
            .map(|input| with_span(input.with_error(&step.id, error), span))
            .collect(),
        ErrorMode::Cache => {
            let failed: Vec<FlowMessage> = inputs
                .iter()
                .map(|input| with_span(input.with_error(&step.id, error), span))
                .collect();
            if let (Some(cache), Some(key)) = (cache, key) {
                if let Err(store_error) = cache.store(key, &capture_outcome(&failed)) {
                    warn!(step = %step.id, %store_error, "error-cache store failed");
                }
            }
            failed
        }
    }
}
