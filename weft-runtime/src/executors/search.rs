//! ABOUTME: Vector and document search executors over the shared index client
//! ABOUTME: Text query in, list of search results out; top_k from input or default

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::semantic::{Index, IndexKind, Step, StepKind};

use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;
use crate::telemetry::SpanKind;

const TOP_K_VARIABLE: &str = "top_k";

fn query_text(step: &Step, message: &FlowMessage) -> Result<String> {
    let input = step
        .inputs
        .iter()
        .find(|var| var.id != TOP_K_VARIABLE)
        .ok_or_else(|| WeftError::step(&step.id, "no query input declared"))?;
    Ok(message.variable(&input.id)?.render_text())
}

fn top_k(step: &Step, message: &FlowMessage, default: usize) -> usize {
    match message.get(TOP_K_VARIABLE) {
        Some(Value::Int(k)) if *k > 0 => usize::try_from(*k).unwrap_or(default),
        _ => default,
    }
}

fn results_value(results: Vec<weft_core::SearchResult>) -> Value {
    Value::List(results.into_iter().map(Value::SearchResult).collect())
}

pub struct VectorSearchExecutor {
    step: Arc<Step>,
    index: Arc<Index>,
    default_top_k: usize,
    filters: serde_json::Map<String, serde_json::Value>,
    ctx: ExecutorContext,
}

impl VectorSearchExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::VectorSearch {
            index,
            default_top_k,
            filters,
        } = &step.kind
        else {
            return Err(WeftError::configuration(format!(
                "VectorSearchExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let (index, default_top_k, filters) = (index.clone(), *default_top_k, filters.clone());
        Ok(Self {
            step,
            index,
            default_top_k,
            filters,
            ctx,
        })
    }
}

#[async_trait]
impl StepExecutor for VectorSearchExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Retriever
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let IndexKind::Vector { embedding_model } = &self.index.kind else {
            return Err(WeftError::configuration(format!(
                "index '{}' is not a vector index",
                self.index.id
            )));
        };
        let query = query_text(&self.step, &message)?;
        let k = top_k(&self.step, &message, self.default_top_k);
        emitter.status(format!("Searching '{}' for top {k}", self.index.name));

        let auth = match &embedding_model.auth {
            Some(provider) => Some(self.ctx.auth.session(provider).await?),
            None => None,
        };
        let embedder = self
            .ctx
            .embedding_factory
            .adapter(embedding_model, auth.as_ref())?;
        let vectors = embedder.embed(&[query]).await?;
        let query_vector = vectors.first().ok_or_else(|| {
            WeftError::adapter("embedding adapter returned no vector for the query")
        })?;

        let client = self.ctx.index_factory.client(&self.index)?;
        let results = client
            .vector_search(&self.index, query_vector, k, &self.filters)
            .await?;
        emitter.status(format!("Search found {} results", results.len()));

        let output = &self.step.outputs[0];
        Ok(vec![
            message.with_values([(output.id.clone(), results_value(results))]),
        ])
    }
}

pub struct DocumentSearchExecutor {
    step: Arc<Step>,
    index: Arc<Index>,
    filters: serde_json::Map<String, serde_json::Value>,
    ctx: ExecutorContext,
}

impl DocumentSearchExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::DocumentSearch { index, filters } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "DocumentSearchExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let (index, filters) = (index.clone(), filters.clone());
        Ok(Self {
            step,
            index,
            filters,
            ctx,
        })
    }
}

#[async_trait]
impl StepExecutor for DocumentSearchExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Retriever
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let query = query_text(&self.step, &message)?;
        let k = top_k(&self.step, &message, 50);
        emitter.status(format!("Searching '{}' for top {k}", self.index.name));

        let client = self.ctx.index_factory.client(&self.index)?;
        let results = client
            .document_search(&self.index, &query, k, &self.filters)
            .await?;
        emitter.status(format!("Search found {} results", results.len()));

        let output = &self.step.outputs[0];
        Ok(vec![
            message.with_values([(output.id.clone(), results_value(results))]),
        ])
    }
}
