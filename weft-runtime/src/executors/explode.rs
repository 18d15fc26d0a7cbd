//! ABOUTME: Explode executor: one output message per element of a list input

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::semantic::{Step, StepKind};

use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;

pub struct ExplodeExecutor {
    step: Arc<Step>,
}

impl ExplodeExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        if !matches!(step.kind, StepKind::Explode) {
            return Err(WeftError::configuration(format!(
                "ExplodeExecutor cannot run a {} step",
                step.kind_name()
            )));
        }
        Ok(Self { step })
    }
}

#[async_trait]
impl StepExecutor for ExplodeExecutor {
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
        let value = message.variable(&input.id)?;
        let Value::List(items) = value else {
            return Err(WeftError::step(
                &self.step.id,
                format!(
                    "variable '{}' is a {}, expected a list",
                    input.id,
                    value.type_name()
                ),
            ));
        };
        Ok(items
            .iter()
            .map(|item| message.with_values([(output.id.clone(), item.clone())]))
            .collect())
    }
}
