//! ABOUTME: PromptTemplate executor: renders a template against input variables

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::semantic::{Step, StepKind, TemplateSource};

use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;

pub struct PromptTemplateExecutor {
    step: Arc<Step>,
    source: TemplateSource,
    loaded: OnceCell<String>,
}

impl PromptTemplateExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        let StepKind::PromptTemplate { template } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "PromptTemplateExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let source = template.clone();
        Ok(Self {
            step,
            source,
            loaded: OnceCell::new(),
        })
    }

    async fn template(&self) -> Result<&str> {
        let step_id = self.step.id.clone();
        let source = self.source.clone();
        self.loaded
            .get_or_try_init(|| async move {
                match source {
                    TemplateSource::Inline(template) => Ok(template),
                    TemplateSource::Path(path) => {
                        tokio::fs::read_to_string(&path).await.map_err(|e| {
                            WeftError::Configuration {
                                message: format!(
                                    "prompt '{step_id}' cannot read template '{path}': {e}"
                                ),
                            }
                        })
                    }
                }
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl StepExecutor for PromptTemplateExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let mut rendered = self.template().await?.to_string();
        for input in &self.step.inputs {
            let value = match message.get(&input.id) {
                Some(value) => value.render_text(),
                None if input.optional => String::new(),
                None => return Err(message_missing(&self.step.id, &input.id)),
            };
            rendered = rendered.replace(&format!("{{{}}}", input.id), &value);
        }
        let output = &self.step.outputs[0];
        Ok(vec![
            message.with_values([(output.id.clone(), Value::Text(rendered))]),
        ])
    }
}

fn message_missing(step_id: &str, var_id: &str) -> WeftError {
    WeftError::step(step_id, format!("required variable '{var_id}' is not set"))
}
