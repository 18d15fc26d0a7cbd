//! ABOUTME: End-to-end flow tests: resolved YAML documents driven through run_flow
//! ABOUTME: Mock LLM adapter, native tools, file source/sink, cancellation, fail mode

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use weft_core::{
    ChatMessage, ChatRole, FlowMessage, Result, Session, StreamEvent, StreamEventPayload, Value,
    WeftError,
};
use weft_dsl::model::DocumentRoot;
use weft_dsl::resolve;
use weft_dsl::semantic::{Flow, Model};
use weft_runtime::adapters::llm::{
    ChatResponse, CompletionResponse, LanguageModelAdapter, LanguageModelFactory, ToolSchema,
};
use weft_runtime::auth::AuthSession;
use weft_runtime::{run_flow, ExecutorContext};

fn resolve_flow(yaml: &str, flow_id: &str) -> Arc<Flow> {
    let root: DocumentRoot = serde_yaml::from_str(yaml).unwrap();
    let (app, _) = resolve(&root).unwrap();
    app.flow(flow_id).expect("flow not found").clone()
}

fn chat_session(history: Vec<ChatMessage>) -> Arc<Session> {
    Arc::new(Session::new("chat-session").with_history(history))
}

/// Scripted adapter: replies with a canned transform of the last message.
struct ScriptedAdapter {
    reply_prefix: String,
    calls: AtomicUsize,
    seen_messages: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl LanguageModelAdapter for ScriptedAdapter {
    async fn complete(
        &self,
        prompt: &str,
        _params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionResponse {
            text: format!("{}{prompt}", self.reply_prefix),
            reasoning: Some("thinking hard".to_string()),
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSchema],
        _params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_messages.lock().push(messages.to_vec());
        let last = messages.last().map(ChatMessage::text).unwrap_or_default();
        Ok(ChatResponse {
            message: ChatMessage::new(ChatRole::Assistant, format!("{}{last}", self.reply_prefix)),
            reasoning: None,
            tool_calls: Vec::new(),
        })
    }
}

struct ScriptedFactory {
    adapter: Arc<ScriptedAdapter>,
}

impl LanguageModelFactory for ScriptedFactory {
    fn adapter(
        &self,
        _model: &Arc<Model>,
        _auth: Option<&AuthSession>,
    ) -> Result<Arc<dyn LanguageModelAdapter>> {
        Ok(self.adapter.clone())
    }
}

fn scripted_context(prefix: &str) -> (ExecutorContext, Arc<ScriptedAdapter>) {
    let adapter = Arc::new(ScriptedAdapter {
        reply_prefix: prefix.to_string(),
        calls: AtomicUsize::new(0),
        seen_messages: Mutex::new(Vec::new()),
    });
    let ctx = ExecutorContext::new().with_llm_factory(Arc::new(ScriptedFactory {
        adapter: adapter.clone(),
    }));
    (ctx, adapter)
}

#[tokio::test]
async fn test_prompt_then_completion_flow() {
    let flow = resolve_flow(
        r"
id: app
models:
  - type: Model
    id: m
    provider: openai
variables:
  - id: question
    type: text
  - id: prompt
    type: text
  - id: answer
    type: text
flows:
  - id: main
    steps:
      - type: PromptTemplate
        id: render
        template: 'Q: {question}'
        inputs: [question]
        outputs: [prompt]
      - type: LLMInference
        id: infer
        model: m
        inputs: [prompt]
        outputs: [answer]
",
        "main",
    );
    let (ctx, adapter) = scripted_context("A: ");

    let input = FlowMessage::new(Arc::new(Session::new("s")))
        .with_values([("question", Value::from("why"))]);
    let results = run_flow(&flow, vec![input], &ctx).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].get("answer"),
        Some(&Value::from("A: Q: why"))
    );
    // Terminal reasoning content rides along as a variable.
    assert_eq!(
        results[0].get("reasoning"),
        Some(&Value::from("thinking hard"))
    );
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_chat_flow_merges_session_history() {
    let flow = resolve_flow(
        r"
id: app
models:
  - type: Model
    id: m
    provider: openai
variables:
  - id: user_turn
    type: ChatMessage
  - id: reply
    type: ChatMessage
flows:
  - id: chat
    mode: Chat
    inputs: [user_turn]
    outputs: [reply]
    steps:
      - type: LLMInference
        id: respond
        model: m
        system_message: Be brief.
        inputs: [user_turn]
        outputs: [reply]
",
        "chat",
    );
    let (ctx, adapter) = scripted_context("echo: ");

    let session = chat_session(vec![
        ChatMessage::new(ChatRole::User, "earlier question"),
        ChatMessage::new(ChatRole::Assistant, "earlier answer"),
    ]);
    let input = FlowMessage::new(session).with_values([(
        "user_turn",
        Value::Chat(ChatMessage::new(ChatRole::User, "current turn")),
    )]);

    let results = run_flow(&flow, vec![input], &ctx).await.unwrap();
    let Some(Value::Chat(reply)) = results[0].get("reply") else {
        panic!("expected chat reply");
    };
    assert_eq!(reply.text(), "echo: current turn");

    // The adapter saw: system message, two history turns, current turn.
    let seen = adapter.seen_messages.lock();
    let messages = &seen[0];
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, ChatRole::System);
    assert_eq!(messages[1].text(), "earlier question");
    assert_eq!(messages[3].text(), "current turn");
}

#[tokio::test]
async fn test_llm_streaming_events_bracket_deltas() {
    let flow = resolve_flow(
        r"
id: app
models:
  - type: Model
    id: m
    provider: openai
variables:
  - id: prompt
    type: text
  - id: answer
    type: text
flows:
  - id: main
    steps:
      - type: LLMInference
        id: infer
        model: m
        inputs: [prompt]
        outputs: [answer]
",
        "main",
    );
    let events: Arc<Mutex<Vec<StreamEvent>>> = Arc::default();
    let sink = events.clone();
    let (ctx, _adapter) = scripted_context("out: ");
    let ctx = ctx.with_stream_callback(Arc::new(move |event| sink.lock().push(event)));

    let input = FlowMessage::new(Arc::new(Session::new("s")))
        .with_values([("prompt", Value::from("hi"))]);
    run_flow(&flow, vec![input], &ctx).await.unwrap();

    let events = events.lock();
    let starts = events
        .iter()
        .filter(|e| matches!(e.payload, StreamEventPayload::TextStreamStart { .. }))
        .count();
    let deltas = events
        .iter()
        .filter(|e| matches!(e.payload, StreamEventPayload::TextStreamDelta { .. }))
        .count();
    let ends = events
        .iter()
        .filter(|e| matches!(e.payload, StreamEventPayload::TextStreamEnd { .. }))
        .count();
    assert_eq!(starts, 1);
    assert!(deltas >= 1);
    assert_eq!(ends, 1);
}

#[tokio::test]
async fn test_native_tool_invocation_with_bindings() {
    let flow = resolve_flow(
        r"
id: app
tools:
  - type: FunctionTool
    id: doubler
    name: doubler
    description: doubles a number
    module_path: math
    function_name: double
    inputs:
      n:
        type: int
    outputs:
      result:
        type: int
variables:
  - id: value
    type: int
  - id: doubled
    type: int
flows:
  - id: main
    steps:
      - type: InvokeTool
        id: call
        tool: doubler
        input_bindings:
          n: value
        output_bindings:
          result: doubled
        inputs: [value]
        outputs: [doubled]
",
        "main",
    );
    let ctx = ExecutorContext::new();
    ctx.functions.register("math", "double", |args| async move {
        let n = args
            .get("n")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| WeftError::step("doubler", "missing n"))?;
        Ok(serde_json::json!({"result": n * 2}))
    });

    let input = FlowMessage::new(Arc::new(Session::new("s")))
        .with_values([("value", Value::Int(21))]);
    let results = run_flow(&flow, vec![input], &ctx).await.unwrap();
    assert_eq!(results[0].get("doubled"), Some(&Value::Int(42)));
}

#[tokio::test]
async fn test_source_flow_runs_once_with_no_input() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("people.csv");
    std::fs::write(&csv_path, "name,age\nada,36\ngrace,85\n").unwrap();
    let out_path = dir.path().join("out").join("people.jsonl");

    let yaml = format!(
        r"
id: app
variables:
  - id: name
    type: text
  - id: age
    type: int
flows:
  - id: copy
    steps:
      - type: FileSource
        id: read
        path:
          uri: {}
        outputs: [name, age]
      - type: FileSink
        id: write
        path:
          uri: {}
        inputs: [name, age]
",
        csv_path.display(),
        out_path.display()
    );
    let flow = resolve_flow(&yaml, "copy");
    let ctx = ExecutorContext::new();

    // No initial messages: the source still executes exactly once.
    let results = run_flow(&flow, vec![], &ctx).await.unwrap();
    assert_eq!(results.len(), 1);

    let written = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["name"], "ada");
    assert_eq!(first["age"], 36);
}

#[tokio::test]
async fn test_explode_then_collect_roundtrip() {
    let flow = resolve_flow(
        r"
id: app
variables:
  - id: items
    type: list[text]
  - id: item
    type: text
  - id: gathered
    type: list[text]
flows:
  - id: main
    steps:
      - type: Explode
        id: fan_out
        inputs: [items]
        outputs: [item]
      - type: Collect
        id: fan_in
        inputs: [item]
        outputs: [gathered]
",
        "main",
    );
    let ctx = ExecutorContext::new();
    let input = FlowMessage::new(Arc::new(Session::new("s"))).with_values([(
        "items",
        Value::List(vec![Value::from("x"), Value::from("y"), Value::from("z")]),
    )]);

    let results = run_flow(&flow, vec![input], &ctx).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].get("gathered"),
        Some(&Value::List(vec![
            Value::from("x"),
            Value::from("y"),
            Value::from("z"),
        ]))
    );
}

#[tokio::test]
async fn test_fail_error_mode_aborts_run() {
    let flow = resolve_flow(
        r"
id: app
variables:
  - id: payload
    type: text
  - id: decoded
    type: text
flows:
  - id: main
    steps:
      - type: Decoder
        id: decode
        format: json
        error_mode: fail
        inputs: [payload]
        outputs: [decoded]
",
        "main",
    );
    let ctx = ExecutorContext::new();
    let input = FlowMessage::new(Arc::new(Session::new("s")))
        .with_values([("payload", Value::from("this is not json"))]);

    let err = run_flow(&flow, vec![input], &ctx).await.unwrap_err();
    assert_eq!(err.kind(), "step");
}

#[tokio::test]
async fn test_drop_error_mode_isolates_failure_to_message() {
    let flow = resolve_flow(
        r"
id: app
variables:
  - id: payload
    type: text
  - id: decoded
    type: text
flows:
  - id: main
    steps:
      - type: Decoder
        id: decode
        format: json
        inputs: [payload]
        outputs: [decoded]
",
        "main",
    );
    let ctx = ExecutorContext::new();
    let good = FlowMessage::new(Arc::new(Session::new("s")))
        .with_values([("payload", Value::from("\"ok\""))]);
    let bad = FlowMessage::new(Arc::new(Session::new("s")))
        .with_values([("payload", Value::from("not json"))]);

    let results = run_flow(&flow, vec![good, bad], &ctx).await.unwrap();
    assert_eq!(results.len(), 2);
    let failed = results.iter().filter(|m| m.is_failed()).count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_cancellation_propagates() {
    let flow = resolve_flow(
        r"
id: app
variables:
  - id: a
    type: text
flows:
  - id: main
    steps:
      - type: Echo
        id: pass
        inputs: [a]
        outputs: [a]
",
        "main",
    );
    let token = CancellationToken::new();
    token.cancel();
    let ctx = ExecutorContext::new().with_cancellation(token);
    let input =
        FlowMessage::new(Arc::new(Session::new("s"))).with_values([("a", Value::from("x"))]);

    let err = run_flow(&flow, vec![input], &ctx).await.unwrap_err();
    assert_eq!(err.kind(), "cancelled");
}

#[tokio::test]
async fn test_nested_flow_as_step() {
    let flow = resolve_flow(
        r"
id: app
variables:
  - id: a
    type: text
  - id: b
    type: text
flows:
  - id: inner
    steps:
      - type: Echo
        id: inner_pass
        inputs: [a]
        outputs: [b]
  - id: outer
    steps:
      - type: Echo
        id: outer_pass
        inputs: [a]
        outputs: [a]
      - inner
",
        "outer",
    );
    let ctx = ExecutorContext::new();
    let input =
        FlowMessage::new(Arc::new(Session::new("s"))).with_values([("a", Value::from("hello"))]);

    let results = run_flow(&flow, vec![input], &ctx).await.unwrap();
    assert_eq!(results[0].get("b"), Some(&Value::from("hello")));
}

#[tokio::test]
async fn test_between_step_order_is_fifo_with_single_workers() {
    let flow = resolve_flow(
        r"
id: app
variables:
  - id: items
    type: list[int]
  - id: item
    type: int
flows:
  - id: main
    steps:
      - type: Explode
        id: fan_out
        inputs: [items]
        outputs: [item]
      - type: Echo
        id: pass
        inputs: [item]
        outputs: [item]
",
        "main",
    );
    let ctx = ExecutorContext::new();
    let input = FlowMessage::new(Arc::new(Session::new("s"))).with_values([(
        "items",
        Value::List((0..20).map(Value::Int).collect()),
    )]);

    let results = run_flow(&flow, vec![input], &ctx).await.unwrap();
    let order: Vec<i64> = results
        .iter()
        .map(|m| match m.get("item") {
            Some(Value::Int(i)) => *i,
            other => panic!("unexpected value {other:?}"),
        })
        .collect();
    assert_eq!(order, (0..20).collect::<Vec<i64>>());
}
