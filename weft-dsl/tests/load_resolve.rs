//! ABOUTME: Integration tests for the loader + resolver pipeline
//! ABOUTME: Round-trips, include expansion, and full-application resolution

use std::fs;
use std::path::Path;

use weft_dsl::model::DocumentRoot;
use weft_dsl::{load_document, load_raw, parse_document, resolve};

const FULL_APP: &str = r#"
id: support_bot
description: Answer support questions with retrieval context
types:
  - id: Ticket
    properties:
      subject: text
      body: text
variables:
  - id: user_turn
    type: ChatMessage
  - id: reply
    type: ChatMessage
  - id: question
    type: text
  - id: context_hits
    type: list[SearchResult]
auths:
  - type: api_key
    id: llm_key
    api_key: ${WEFT_LLM_KEY:sk-test}
models:
  - type: Model
    id: gpt
    provider: openai
    model_id: gpt-4o-mini
    auth: llm_key
  - type: EmbeddingModel
    id: embedder
    provider: openai
    dimensions: 1536
    auth: llm_key
indexes:
  - type: VectorIndex
    id: kb
    name: knowledge-base
    embedding_model: embedder
memories:
  - id: chat_mem
flows:
  - id: chat
    mode: Chat
    inputs: [user_turn]
    outputs: [reply]
    steps:
      - type: VectorSearch
        id: retrieve
        index: kb
        inputs: [question]
        outputs: [context_hits]
      - type: LLMInference
        id: respond
        model: gpt
        memory: chat_mem
        system_message: You are a support assistant.
        inputs: [user_turn]
        outputs: [reply]
"#;

#[test]
fn test_full_application_resolves() {
    let root: DocumentRoot = serde_yaml::from_str(FULL_APP).unwrap();
    let (app, types) = resolve(&root).unwrap();

    assert_eq!(app.id, "support_bot");
    assert!(types.get("Ticket").is_some());

    let flow = app.flow("chat").expect("chat flow");
    assert_eq!(flow.steps.len(), 2);

    // The index's embedding model and the standalone model list entry are
    // the same resolved object.
    let weft_dsl::semantic::StepKind::VectorSearch { index, .. } = &flow.steps[0].kind else {
        panic!("expected vector search step");
    };
    let weft_dsl::semantic::IndexKind::Vector { embedding_model } = &index.kind else {
        panic!("expected vector index");
    };
    let listed = app
        .models
        .iter()
        .find(|m| m.id == "embedder")
        .expect("embedder model");
    assert!(std::sync::Arc::ptr_eq(embedding_model, listed));
}

#[test]
fn test_every_reference_is_resolved_to_an_object() {
    let root: DocumentRoot = serde_yaml::from_str(FULL_APP).unwrap();
    let (app, _) = resolve(&root).unwrap();
    for flow in &app.flows {
        for step in &flow.steps {
            match &step.kind {
                weft_dsl::semantic::StepKind::LlmInference { model, memory, .. } => {
                    assert!(!model.provider.is_empty());
                    assert!(memory.is_some());
                }
                weft_dsl::semantic::StepKind::VectorSearch { index, .. } => {
                    assert!(!index.name.is_empty());
                }
                _ => {}
            }
        }
    }
}

#[test]
fn test_load_serialize_load_is_stable() {
    let root: DocumentRoot = serde_yaml::from_str(FULL_APP).unwrap();
    let rendered = serde_yaml::to_string(&root).unwrap();
    let again: DocumentRoot = serde_yaml::from_str(&rendered).unwrap();
    assert_eq!(root, again);
}

#[test]
fn test_optional_marker_preserved_on_serialization() {
    let yaml = "- id: maybe\n  type: 'int?'\n";
    let root: DocumentRoot = serde_yaml::from_str(yaml).unwrap();
    let rendered = serde_yaml::to_string(&root).unwrap();
    assert!(rendered.contains("int?"));
}

#[test]
fn test_loaded_file_with_includes_resolves() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "variables.yaml", "- id: a\n  type: text\n");
    write(
        dir.path(),
        "app.yaml",
        "id: included_app\nvariables: !include variables.yaml\nflows:\n  - id: main\n    steps:\n      - type: Echo\n        id: pass\n        inputs: [a]\n        outputs: [a]\n",
    );

    let root = load_document(dir.path().join("app.yaml").to_str().unwrap()).unwrap();
    let (app, _) = resolve(&root).unwrap();
    assert_eq!(app.id, "included_app");
    assert_eq!(app.variables[0].id, "a");
}

#[test]
fn test_env_expansion_reaches_parsed_model() {
    std::env::set_var("WEFT_TEST_MODEL_PROVIDER", "anthropic");
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "app.yaml",
        "id: env_app\nmodels:\n  - type: Model\n    id: m\n    provider: ${WEFT_TEST_MODEL_PROVIDER}\n",
    );
    let value = load_raw(dir.path().join("app.yaml").to_str().unwrap()).unwrap();
    let root = parse_document(value).unwrap();
    let DocumentRoot::Application(app) = root else {
        panic!("expected application");
    };
    let weft_dsl::model::ModelDef::Model(fields) = &app.models[0] else {
        panic!("expected base model");
    };
    assert_eq!(fields.provider, "anthropic");
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}
