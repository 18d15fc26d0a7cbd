//! ABOUTME: Sub-flow executor: nested flows and InvokeFlow steps with variable bindings

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, Result, VariableSlot, WeftError};
use weft_dsl::semantic::{Flow, Step, StepKind};

use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;
use crate::flow::run_flow;
use crate::telemetry::SpanKind;

pub struct SubflowExecutor {
    step: Arc<Step>,
    flow: Arc<Flow>,
    input_bindings: BTreeMap<String, String>,
    output_bindings: BTreeMap<String, String>,
    ctx: ExecutorContext,
}

impl SubflowExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let (flow, input_bindings, output_bindings) = match &step.kind {
            StepKind::Flow(flow) => (flow.clone(), BTreeMap::new(), BTreeMap::new()),
            StepKind::InvokeFlow {
                flow,
                input_bindings,
                output_bindings,
            } => (flow.clone(), input_bindings.clone(), output_bindings.clone()),
            other => {
                return Err(WeftError::configuration(format!(
                    "SubflowExecutor cannot run a {} step",
                    other.name()
                )));
            }
        };
        Ok(Self {
            step,
            flow,
            input_bindings,
            output_bindings,
            ctx,
        })
    }
}

#[async_trait]
impl StepExecutor for SubflowExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Chain
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        // Bound inputs build a fresh message on the same session; an empty
        // binding map hands the whole variable map through.
        let sub_input = if self.input_bindings.is_empty() {
            message.clone()
        } else {
            let mut bound = FlowMessage::new(message.session().clone());
            for (flow_input_id, step_var_id) in &self.input_bindings {
                let value = message.variable(step_var_id)?;
                bound = bound.with_values([(flow_input_id.clone(), value.clone())]);
            }
            bound
        };

        let results = run_flow(&self.flow, vec![sub_input], &self.ctx.child_run()).await?;

        let mut outputs = Vec::with_capacity(results.len());
        for result in results {
            if let Some(error) = result.error() {
                outputs.push(message.with_error_record(error.clone()));
                continue;
            }
            let updates: Vec<(String, VariableSlot)> = if self.output_bindings.is_empty() {
                result
                    .variables()
                    .iter()
                    .map(|(key, slot)| (key.clone(), slot.clone()))
                    .collect()
            } else {
                let mut bound = Vec::new();
                for (flow_output_id, step_var_id) in &self.output_bindings {
                    let value = result.variable(flow_output_id)?;
                    bound.push((step_var_id.clone(), VariableSlot::Set(value.clone())));
                }
                bound
            };
            outputs.push(message.with_variables(updates));
        }
        Ok(outputs)
    }
}
