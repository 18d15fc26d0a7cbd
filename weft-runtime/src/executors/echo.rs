//! ABOUTME: Echo executor: passes input variables through to output names unchanged

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, Result, VariableSlot, WeftError};
use weft_dsl::semantic::{Step, StepKind};

use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;

pub struct EchoExecutor {
    step: Arc<Step>,
}

impl EchoExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        if !matches!(step.kind, StepKind::Echo) {
            return Err(WeftError::configuration(format!(
                "EchoExecutor cannot run a {} step",
                step.kind_name()
            )));
        }
        Ok(Self { step })
    }
}

#[async_trait]
impl StepExecutor for EchoExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let updates: Vec<(String, VariableSlot)> = self
            .step
            .inputs
            .iter()
            .zip(self.step.outputs.iter())
            .map(|(input, output)| {
                let slot = message
                    .variables()
                    .get(&input.id)
                    .cloned()
                    .unwrap_or(VariableSlot::Unset);
                (output.id.clone(), slot)
            })
            .collect();
        Ok(vec![message.with_variables(updates)])
    }
}
