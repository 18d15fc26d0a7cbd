//! ABOUTME: IndexUpsert executor: bulk-writes chunk batches into an index

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, RagChunk, Result, Value, WeftError};
use weft_dsl::semantic::{Index, Step, StepKind};

use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::executor::BatchedStepExecutor;

pub struct IndexUpsertExecutor {
    step: Arc<Step>,
    index: Arc<Index>,
    ctx: ExecutorContext,
}

impl IndexUpsertExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::IndexUpsert { index } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "IndexUpsertExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let index = index.clone();
        Ok(Self { step, index, ctx })
    }

    fn to_chunk(&self, value: &Value) -> Result<RagChunk> {
        match value {
            Value::Chunk(chunk) => Ok(chunk.clone()),
            // Whole documents are written as single unsplit chunks.
            Value::Document(doc) => Ok(RagChunk {
                doc_id: doc.doc_id.clone(),
                chunk_index: 0,
                content: doc.content.clone(),
                vector: None,
                metadata: doc.metadata.clone(),
            }),
            other => Err(WeftError::step(
                &self.step.id,
                format!("cannot upsert a {} value", other.type_name()),
            )),
        }
    }
}

#[async_trait]
impl BatchedStepExecutor for IndexUpsertExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_batch(
        &self,
        batch: Vec<FlowMessage>,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let input = &self.step.inputs[0];
        let mut chunks = Vec::with_capacity(batch.len());
        for message in &batch {
            chunks.push(self.to_chunk(message.variable(&input.id)?)?);
        }
        let client = self.ctx.index_factory.client(&self.index)?;
        let written = client.bulk_upsert(&self.index, &chunks).await?;
        emitter.status(format!(
            "Upserted {written} chunks into index '{}'",
            self.index.name
        ));
        Ok(batch)
    }
}
