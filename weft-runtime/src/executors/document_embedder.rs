//! ABOUTME: DocumentEmbedder executor: vectorizes chunk batches through the embedding adapter

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::semantic::{Model, Step, StepKind};

use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::executor::BatchedStepExecutor;
use crate::telemetry::SpanKind;

pub struct DocumentEmbedderExecutor {
    step: Arc<Step>,
    model: Arc<Model>,
    ctx: ExecutorContext,
}

impl DocumentEmbedderExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::DocumentEmbedder { model } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "DocumentEmbedderExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let model = model.clone();
        Ok(Self { step, model, ctx })
    }
}

#[async_trait]
impl BatchedStepExecutor for DocumentEmbedderExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Embedding
    }

    async fn process_batch(
        &self,
        batch: Vec<FlowMessage>,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let input = &self.step.inputs[0];
        let output = &self.step.outputs[0];

        let mut chunks = Vec::with_capacity(batch.len());
        for message in &batch {
            let Value::Chunk(chunk) = message.variable(&input.id)? else {
                return Err(WeftError::step(
                    &self.step.id,
                    format!("variable '{}' does not hold a chunk", input.id),
                ));
            };
            chunks.push(chunk.clone());
        }

        let auth = match &self.model.auth {
            Some(provider) => Some(self.ctx.auth.session(provider).await?),
            None => None,
        };
        let adapter = self
            .ctx
            .embedding_factory
            .adapter(&self.model, auth.as_ref())?;
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        emitter.status(format!("Embedding {} chunks", texts.len()));
        let vectors = adapter.embed(&texts).await?;

        Ok(batch
            .into_iter()
            .zip(chunks.into_iter().zip(vectors))
            .map(|(message, (mut chunk, vector))| {
                chunk.vector = Some(vector);
                message.with_values([(output.id.clone(), Value::Chunk(chunk))])
            })
            .collect())
    }
}
