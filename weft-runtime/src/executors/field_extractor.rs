//! ABOUTME: FieldExtractor executor: JSON-path projection over one input value
//! ABOUTME: One output message per matched node

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::semantic::{Step, StepKind};

use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;

pub struct FieldExtractorExecutor {
    step: Arc<Step>,
    json_path: String,
}

impl FieldExtractorExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        let StepKind::FieldExtractor { json_path } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "FieldExtractorExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let json_path = json_path.clone();
        Ok(Self { step, json_path })
    }
}

#[async_trait]
impl StepExecutor for FieldExtractorExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let input = &self.step.inputs[0];
        let output = &self.step.outputs[0];
        let source = message.variable(&input.id)?.to_json();

        let matches = jsonpath_lib::select(&source, &self.json_path).map_err(|e| {
            WeftError::step(
                &self.step.id,
                format!("path '{}' failed: {e}", self.json_path),
            )
        })?;
        if matches.is_empty() {
            return Err(WeftError::step(
                &self.step.id,
                format!("path '{}' matched nothing", self.json_path),
            ));
        }

        matches
            .into_iter()
            .map(|node| {
                let value = Value::coerce(node.clone(), &output.ty)
                    .unwrap_or_else(|_| Value::from_json(node.clone()));
                Ok(message.with_values([(output.id.clone(), value)]))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{PrimitiveType, Session, VarType};
    use weft_dsl::semantic::{StepRuntime, Variable};

    fn step() -> Arc<Step> {
        Arc::new(Step {
            id: "extract".into(),
            runtime: StepRuntime::default(),
            inputs: vec![Arc::new(Variable {
                id: "payload".into(),
                ty: VarType::Primitive(PrimitiveType::Text),
                optional: false,
            })],
            outputs: vec![Arc::new(Variable {
                id: "name".into(),
                ty: VarType::Primitive(PrimitiveType::Text),
                optional: false,
            })],
            kind: StepKind::FieldExtractor {
                json_path: "$.users[*].name".into(),
            },
        })
    }

    #[tokio::test]
    async fn test_multi_match_emits_one_message_each() {
        let executor = FieldExtractorExecutor::new(step()).unwrap();
        let payload = serde_json::json!({"users": [{"name": "ada"}, {"name": "grace"}]});
        let message = FlowMessage::new(Arc::new(Session::new("s")))
            .with_values([("payload", Value::from_json(payload))]);

        let emitter = StreamEmitter::new("extract", None);
        let out = executor.process_message(message, &emitter).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get("name"), Some(&Value::from("ada")));
        assert_eq!(out[1].get("name"), Some(&Value::from("grace")));
    }

    #[tokio::test]
    async fn test_no_match_is_step_error() {
        let executor = FieldExtractorExecutor::new(step()).unwrap();
        let message = FlowMessage::new(Arc::new(Session::new("s")))
            .with_values([("payload", Value::from_json(serde_json::json!({"users": []})))]);
        let emitter = StreamEmitter::new("extract", None);
        assert!(executor.process_message(message, &emitter).await.is_err());
    }
}
