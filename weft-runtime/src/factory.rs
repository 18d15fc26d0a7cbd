//! ABOUTME: Maps resolved steps to their executors

use std::sync::Arc;

use weft_core::Result;
use weft_dsl::semantic::{Step, StepKind};

use crate::context::ExecutorContext;
use crate::executor::ExecutorKind;
use crate::executors::aggregate::AggregateExecutor;
use crate::executors::agent::AgentExecutor;
use crate::executors::collect::CollectExecutor;
use crate::executors::construct::ConstructExecutor;
use crate::executors::decoder::DecoderExecutor;
use crate::executors::doc_splitter::DocumentSplitterExecutor;
use crate::executors::document_embedder::DocumentEmbedderExecutor;
use crate::executors::document_source::DocumentSourceExecutor;
use crate::executors::echo::EchoExecutor;
use crate::executors::explode::ExplodeExecutor;
use crate::executors::field_extractor::FieldExtractorExecutor;
use crate::executors::file_sink::FileSinkExecutor;
use crate::executors::file_source::FileSourceExecutor;
use crate::executors::index_upsert::IndexUpsertExecutor;
use crate::executors::invoke_flow::SubflowExecutor;
use crate::executors::invoke_tool::InvokeToolExecutor;
use crate::executors::llm_inference::LlmInferenceExecutor;
use crate::executors::prompt_template::PromptTemplateExecutor;
use crate::executors::search::{DocumentSearchExecutor, VectorSearchExecutor};
use crate::executors::sql_source::SqlSourceExecutor;

/// Create the executor for a resolved step.
pub fn create_executor(step: &Arc<Step>, ctx: &ExecutorContext) -> Result<ExecutorKind> {
    let step = step.clone();
    let ctx = ctx.clone();
    Ok(match &step.kind {
        StepKind::Echo => ExecutorKind::PerMessage(Arc::new(EchoExecutor::new(step)?)),
        StepKind::Construct { .. } => {
            ExecutorKind::PerMessage(Arc::new(ConstructExecutor::new(step)?))
        }
        StepKind::Explode => ExecutorKind::PerMessage(Arc::new(ExplodeExecutor::new(step)?)),
        StepKind::Collect => ExecutorKind::PerBatch(Arc::new(CollectExecutor::new(step)?)),
        StepKind::Aggregate => {
            ExecutorKind::PerMessage(Arc::new(AggregateExecutor::new(step)?))
        }
        StepKind::FieldExtractor { .. } => {
            ExecutorKind::PerMessage(Arc::new(FieldExtractorExecutor::new(step)?))
        }
        StepKind::Decoder { .. } => {
            ExecutorKind::PerMessage(Arc::new(DecoderExecutor::new(step)?))
        }
        StepKind::PromptTemplate { .. } => {
            ExecutorKind::PerMessage(Arc::new(PromptTemplateExecutor::new(step)?))
        }
        StepKind::LlmInference { .. } => {
            ExecutorKind::PerMessage(Arc::new(LlmInferenceExecutor::new(step, ctx)?))
        }
        StepKind::Agent { .. } => {
            ExecutorKind::PerMessage(Arc::new(AgentExecutor::new(step, ctx)?))
        }
        StepKind::InvokeTool { .. } => {
            ExecutorKind::PerMessage(Arc::new(InvokeToolExecutor::new(step, ctx)?))
        }
        StepKind::InvokeFlow { .. } | StepKind::Flow(_) => {
            ExecutorKind::PerMessage(Arc::new(SubflowExecutor::new(step, ctx)?))
        }
        StepKind::FileSource { .. } => {
            ExecutorKind::PerMessage(Arc::new(FileSourceExecutor::new(step, ctx)?))
        }
        StepKind::FileSink { .. } => {
            ExecutorKind::PerMessage(Arc::new(FileSinkExecutor::new(step)?))
        }
        StepKind::SqlSource { .. } => {
            ExecutorKind::PerMessage(Arc::new(SqlSourceExecutor::new(step, ctx)?))
        }
        StepKind::DocumentSource { .. } => {
            ExecutorKind::PerMessage(Arc::new(DocumentSourceExecutor::new(step, ctx)?))
        }
        StepKind::DocumentSplitter { .. } => {
            ExecutorKind::PerMessage(Arc::new(DocumentSplitterExecutor::new(step)?))
        }
        StepKind::DocumentEmbedder { .. } => {
            ExecutorKind::PerBatch(Arc::new(DocumentEmbedderExecutor::new(step, ctx)?))
        }
        StepKind::IndexUpsert { .. } => {
            ExecutorKind::PerBatch(Arc::new(IndexUpsertExecutor::new(step, ctx)?))
        }
        StepKind::VectorSearch { .. } => {
            ExecutorKind::PerMessage(Arc::new(VectorSearchExecutor::new(step, ctx)?))
        }
        StepKind::DocumentSearch { .. } => {
            ExecutorKind::PerMessage(Arc::new(DocumentSearchExecutor::new(step, ctx)?))
        }
    })
}
