//! ABOUTME: DocumentSplitter executor: one RAG chunk message per split window

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, RagChunk, Result, Value, WeftError};
use weft_dsl::semantic::{Step, StepKind};

use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;
use crate::splitter::split_text;

pub struct DocumentSplitterExecutor {
    step: Arc<Step>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentSplitterExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        let StepKind::DocumentSplitter {
            splitter_name,
            chunk_size,
            chunk_overlap,
        } = &step.kind
        else {
            return Err(WeftError::configuration(format!(
                "DocumentSplitterExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        if splitter_name != "sentence" {
            return Err(WeftError::configuration(format!(
                "unknown splitter '{splitter_name}' for step '{}'",
                step.id
            )));
        }
        let (chunk_size, chunk_overlap) = (*chunk_size, *chunk_overlap);
        Ok(Self {
            step,
            chunk_size,
            chunk_overlap,
        })
    }
}

#[async_trait]
impl StepExecutor for DocumentSplitterExecutor {
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
        let Value::Document(document) = message.variable(&input.id)? else {
            return Err(WeftError::step(
                &self.step.id,
                format!("variable '{}' does not hold a document", input.id),
            ));
        };

        let windows = split_text(&document.content, self.chunk_size, self.chunk_overlap);
        Ok(windows
            .into_iter()
            .enumerate()
            .map(|(index, content)| {
                let chunk = RagChunk {
                    doc_id: document.doc_id.clone(),
                    chunk_index: index,
                    content,
                    vector: None,
                    metadata: document.metadata.clone(),
                };
                message.with_values([(output.id.clone(), Value::Chunk(chunk))])
            })
            .collect())
    }
}
