//! ABOUTME: Executor-framework integration tests: shape operators, caching, concurrency
//! ABOUTME: Exercises execute_step directly with hand-built semantic steps

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use weft_core::{
    FlowMessage, PrimitiveType, Result, Session, StreamEvent, Value, VarType, WeftError,
};
use weft_dsl::model::{ErrorMode, StepCardinality};
use weft_dsl::semantic::{CacheConfig, Step, StepKind, StepRuntime, Variable};
use weft_runtime::executor::{execute_step, message_stream, ExecutorKind, StepExecutor};
use weft_runtime::{create_executor, ExecutorContext, StreamEmitter};

fn var(id: &str, ty: VarType) -> Arc<Variable> {
    Arc::new(Variable {
        id: id.to_string(),
        ty,
        optional: false,
    })
}

fn text_var(id: &str) -> Arc<Variable> {
    var(id, VarType::Primitive(PrimitiveType::Text))
}

fn step(id: &str, kind: StepKind, inputs: Vec<Arc<Variable>>, outputs: Vec<Arc<Variable>>) -> Arc<Step> {
    Arc::new(Step {
        id: id.to_string(),
        runtime: StepRuntime::default(),
        inputs,
        outputs,
        kind,
    })
}

fn message() -> FlowMessage {
    FlowMessage::new(Arc::new(Session::new("test-session")))
}

async fn run(kind: ExecutorKind, ctx: &ExecutorContext, inputs: Vec<FlowMessage>) -> Vec<FlowMessage> {
    execute_step(kind, ctx.clone(), message_stream(inputs))
        .collect()
        .await
}

#[tokio::test]
async fn test_echo_passes_variables_through() {
    let ctx = ExecutorContext::new();
    let echo = step(
        "echo",
        StepKind::Echo,
        vec![text_var("a"), var("b", VarType::Primitive(PrimitiveType::Int))],
        vec![text_var("a"), var("b", VarType::Primitive(PrimitiveType::Int))],
    );
    let input = message().with_values([("a", Value::from("x")), ("b", Value::Int(42))]);

    let out = run(create_executor(&echo, &ctx).unwrap(), &ctx, vec![input]).await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get("a"), Some(&Value::from("x")));
    assert_eq!(out[0].get("b"), Some(&Value::Int(42)));
}

#[tokio::test]
async fn test_explode_emits_one_message_per_element() {
    let ctx = ExecutorContext::new();
    let explode = step(
        "explode",
        StepKind::Explode,
        vec![var(
            "items",
            VarType::List(Box::new(VarType::Primitive(PrimitiveType::Text))),
        )],
        vec![text_var("item")],
    );
    let input = message().with_values([(
        "items",
        Value::List(vec![
            Value::from("apple"),
            Value::from("banana"),
            Value::from("cherry"),
        ]),
    )]);

    let out = run(create_executor(&explode, &ctx).unwrap(), &ctx, vec![input]).await;
    assert_eq!(out.len(), 3);
    let mut values: Vec<String> = out
        .iter()
        .map(|m| m.get("item").unwrap().render_text())
        .collect();
    values.sort();
    assert_eq!(values, vec!["apple", "banana", "cherry"]);
}

#[tokio::test]
async fn test_collect_concatenates_and_intersects_variables() {
    let ctx = ExecutorContext::new();
    let collect = step(
        "collect",
        StepKind::Collect,
        vec![text_var("item")],
        vec![var(
            "items",
            VarType::List(Box::new(VarType::Primitive(PrimitiveType::Text))),
        )],
    );
    let first = message().with_values([
        ("item", Value::from("a")),
        ("common", Value::from("c")),
        ("u1", Value::from("x")),
    ]);
    let second = message().with_values([
        ("item", Value::from("b")),
        ("common", Value::from("c")),
        ("u2", Value::from("y")),
    ]);

    let out = run(
        create_executor(&collect, &ctx).unwrap(),
        &ctx,
        vec![first, second],
    )
    .await;
    assert_eq!(out.len(), 1);
    let result = &out[0];
    assert_eq!(
        result.get("items"),
        Some(&Value::List(vec![Value::from("a"), Value::from("b")]))
    );
    assert_eq!(result.get("common"), Some(&Value::from("c")));
    assert!(result.get("u1").is_none());
    assert!(result.get("u2").is_none());
}

#[tokio::test]
async fn test_aggregate_counts_and_summary_last() {
    let ctx = ExecutorContext::new();
    let aggregate = step("agg", StepKind::Aggregate, vec![], vec![]);

    let mut inputs = Vec::new();
    for i in 0..7 {
        inputs.push(message().with_values([("n", Value::Int(i))]));
    }
    for _ in 0..3 {
        inputs.push(message().with_error("upstream", &WeftError::step("upstream", "boom")));
    }

    let out = run(create_executor(&aggregate, &ctx).unwrap(), &ctx, inputs).await;
    assert_eq!(out.len(), 11);
    let summary = out.last().unwrap();
    assert_eq!(summary.get("num_total"), Some(&Value::Int(10)));
    assert_eq!(summary.get("num_successful"), Some(&Value::Int(7)));
    assert_eq!(summary.get("num_failed"), Some(&Value::Int(3)));
}

#[tokio::test]
async fn test_construct_list_passthrough() {
    let ctx = ExecutorContext::new();
    let list_ty = VarType::List(Box::new(VarType::Primitive(PrimitiveType::Int)));
    let construct = step(
        "construct",
        StepKind::Construct {
            field_bindings: Default::default(),
        },
        vec![var("numbers", list_ty.clone())],
        vec![var("result", list_ty)],
    );
    let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
    let input = message().with_values([("numbers", list.clone())]);

    let out = run(create_executor(&construct, &ctx).unwrap(), &ctx, vec![input]).await;
    assert_eq!(out[0].get("result"), Some(&list));
}

struct SlowExecutor {
    step: Arc<Step>,
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl StepExecutor for SlowExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(vec![message.with_values([("done", Value::Bool(true))])])
    }
}

#[tokio::test]
async fn test_ten_workers_run_concurrently() {
    let ctx = ExecutorContext::new();
    let mut slow_step = Step {
        id: "slow".to_string(),
        runtime: StepRuntime::default(),
        inputs: vec![],
        outputs: vec![],
        kind: StepKind::Echo,
    };
    slow_step.runtime.num_workers = 10;
    let executor = Arc::new(SlowExecutor {
        step: Arc::new(slow_step),
        delay: Duration::from_secs(1),
        calls: AtomicUsize::new(0),
    });

    let inputs: Vec<FlowMessage> = (0..10)
        .map(|i| message().with_values([("i", Value::Int(i))]))
        .collect();
    let started = Instant::now();
    let out = run(ExecutorKind::PerMessage(executor.clone()), &ctx, inputs).await;
    let elapsed = started.elapsed();

    assert_eq!(out.len(), 10);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 10);
    assert!(
        elapsed < Duration::from_secs(5),
        "ten one-second messages took {elapsed:?} with ten workers"
    );
}

#[tokio::test]
async fn test_all_failed_inputs_pass_through_under_concurrency() {
    let ctx = ExecutorContext::new();
    let mut echo_step = Step {
        id: "echo".to_string(),
        runtime: StepRuntime::default(),
        inputs: vec![],
        outputs: vec![],
        kind: StepKind::Echo,
    };
    echo_step.runtime.num_workers = 4;
    let kind = create_executor(&Arc::new(echo_step), &ctx).unwrap();

    let inputs: Vec<FlowMessage> = (0..6)
        .map(|i| {
            message()
                .with_values([("i", Value::Int(i))])
                .with_error("upstream", &WeftError::step("upstream", "bad"))
        })
        .collect();

    let out = run(kind, &ctx, inputs).await;
    assert_eq!(out.len(), 6);
    assert!(out.iter().all(FlowMessage::is_failed));
}

struct CountingExecutor {
    step: Arc<Step>,
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl StepExecutor for CountingExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(WeftError::step(&self.step.id, "deliberate failure"));
        }
        Ok(vec![message.with_values([("out", Value::from("computed"))])])
    }
}

fn cached_step(id: &str, dir: &std::path::Path, error_mode: ErrorMode) -> Arc<Step> {
    Arc::new(Step {
        id: id.to_string(),
        runtime: StepRuntime {
            cardinality: StepCardinality::One,
            num_workers: 1,
            batch_size: 1,
            cache: Some(CacheConfig {
                directory: dir.to_string_lossy().into_owned(),
                namespace: None,
                version: "v1".to_string(),
            }),
            error_mode,
            timeout: None,
        },
        inputs: vec![],
        outputs: vec![],
        kind: StepKind::Echo,
    })
}

#[tokio::test]
async fn test_cache_hit_skips_processing_and_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutorContext::new();
    let step = cached_step("pure", dir.path(), ErrorMode::Drop);
    let executor = Arc::new(CountingExecutor {
        step: step.clone(),
        calls: AtomicUsize::new(0),
        fail: false,
    });

    let input = message().with_values([("q", Value::from("hello"))]);
    let first = run(
        ExecutorKind::PerMessage(executor.clone()),
        &ctx,
        vec![input.clone()],
    )
    .await;
    let second = run(
        ExecutorKind::PerMessage(executor.clone()),
        &ctx,
        vec![input],
    )
    .await;

    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        first[0].canonical_json().to_string(),
        second[0].canonical_json().to_string()
    );
}

#[tokio::test]
async fn test_cached_error_replays_without_invoking_body() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutorContext::new();
    let step = cached_step("flaky", dir.path(), ErrorMode::Cache);
    let executor = Arc::new(CountingExecutor {
        step: step.clone(),
        calls: AtomicUsize::new(0),
        fail: true,
    });

    let input = message().with_values([("q", Value::from("explode"))]);
    let first = run(
        ExecutorKind::PerMessage(executor.clone()),
        &ctx,
        vec![input.clone()],
    )
    .await;
    assert!(first[0].is_failed());

    let second = run(
        ExecutorKind::PerMessage(executor.clone()),
        &ctx,
        vec![input],
    )
    .await;
    assert!(second[0].is_failed());
    assert_eq!(
        second[0].error().unwrap().error_message,
        first[0].error().unwrap().error_message
    );
    // Second run served from cache; the body ran only once.
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_error_mode_drop_marks_message_failed_and_emits_event() {
    let events: Arc<Mutex<Vec<StreamEvent>>> = Arc::default();
    let sink = events.clone();
    let ctx = ExecutorContext::new()
        .with_stream_callback(Arc::new(move |event| sink.lock().push(event)));
    let step = Arc::new(Step {
        id: "boom".to_string(),
        runtime: StepRuntime::default(),
        inputs: vec![],
        outputs: vec![],
        kind: StepKind::Echo,
    });
    let executor = Arc::new(CountingExecutor {
        step,
        calls: AtomicUsize::new(0),
        fail: true,
    });

    let out = run(
        ExecutorKind::PerMessage(executor),
        &ctx,
        vec![message().with_values([("q", Value::from("x"))])],
    )
    .await;
    assert_eq!(out.len(), 1);
    assert!(out[0].is_failed());
    assert_eq!(out[0].error().unwrap().step_id, "boom");
    assert!(events
        .lock()
        .iter()
        .any(|event| matches!(event.payload, weft_core::StreamEventPayload::Error { .. })));
}

#[tokio::test]
async fn test_emitted_messages_carry_span_metadata() {
    let ctx = ExecutorContext::new();
    let echo = step("echo", StepKind::Echo, vec![text_var("a")], vec![text_var("a")]);
    let out = run(
        create_executor(&echo, &ctx).unwrap(),
        &ctx,
        vec![message().with_values([("a", Value::from("x"))])],
    )
    .await;
    let metadata = out[0].metadata();
    assert!(metadata.contains_key("span_id"));
    assert!(metadata.contains_key("trace_id"));
}

#[tokio::test]
async fn test_progress_callback_sees_cache_and_failure_counts() {
    let snapshots: Arc<Mutex<Vec<weft_runtime::ProgressSnapshot>>> = Arc::default();
    let sink = snapshots.clone();
    let ctx = ExecutorContext::new()
        .with_progress_callback(Arc::new(move |snapshot| sink.lock().push(snapshot)));

    let echo = step("echo", StepKind::Echo, vec![text_var("a")], vec![text_var("a")]);
    let ok = message().with_values([("a", Value::from("x"))]);
    let failed = message().with_error("upstream", &WeftError::step("upstream", "bad"));
    let _ = run(create_executor(&echo, &ctx).unwrap(), &ctx, vec![ok, failed]).await;

    let last = snapshots.lock().last().cloned().unwrap();
    assert_eq!(last.processed, 2);
    assert_eq!(last.succeeded, 1);
    assert_eq!(last.failed, 1);
}
