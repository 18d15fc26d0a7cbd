//! ABOUTME: Construct executor: builds a value of the declared output type
//! ABOUTME: Lists pass the single input through; custom types assemble from field bindings

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, Result, Value, VarType, WeftError};
use weft_dsl::semantic::{Step, StepKind};

use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;

pub struct ConstructExecutor {
    step: Arc<Step>,
    field_bindings: BTreeMap<String, String>,
}

impl ConstructExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        let StepKind::Construct { field_bindings } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "ConstructExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let field_bindings = field_bindings.clone();
        Ok(Self {
            step,
            field_bindings,
        })
    }
}

#[async_trait]
impl StepExecutor for ConstructExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let output = &self.step.outputs[0];
        let constructed = match &output.ty {
            VarType::List(_) => {
                let input = &self.step.inputs[0];
                message.variable(&input.id)?.clone()
            }
            VarType::Custom(def) => {
                let mut fields = BTreeMap::new();
                for (field, var_id) in &self.field_bindings {
                    fields.insert(field.clone(), message.variable(var_id)?.clone());
                }
                Value::Custom {
                    type_id: def.id.clone(),
                    fields,
                }
            }
            ty @ (VarType::Primitive(_) | VarType::Domain(_)) => {
                let input = &self.step.inputs[0];
                let raw = message.variable(&input.id)?.to_json();
                Value::coerce(raw, ty)?
            }
        };
        Ok(vec![
            message.with_values([(output.id.clone(), constructed)]),
        ])
    }
}
