//! ABOUTME: FileSource executor: one typed output message per row of a tabular file

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::semantic::{PathBinding, Step, StepKind};

use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;
use crate::tabular;

pub struct FileSourceExecutor {
    step: Arc<Step>,
    path: PathBinding,
    ctx: ExecutorContext,
}

impl FileSourceExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::FileSource { path } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "FileSourceExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let path = path.clone();
        Ok(Self { step, path, ctx })
    }

    fn resolve_path(&self, message: &FlowMessage) -> Result<String> {
        match &self.path {
            PathBinding::Constant(uri) => Ok(uri.clone()),
            PathBinding::Variable(var) => Ok(message.variable(&var.id)?.render_text()),
        }
    }
}

#[async_trait]
impl StepExecutor for FileSourceExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let path = self.resolve_path(&message)?;
        emitter.status(format!("Reading rows from {path}"));
        let rows = tabular::read_rows(&path, &self.ctx.http).await?;

        // Every declared output must exist as a column.
        let columns: std::collections::HashSet<&str> = rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect();
        let missing: Vec<&str> = self
            .step
            .outputs
            .iter()
            .map(|output| output.id.as_str())
            .filter(|id| !rows.is_empty() && !columns.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(WeftError::step(
                &self.step.id,
                format!(
                    "file '{path}' is missing expected columns: {}",
                    missing.join(", ")
                ),
            ));
        }

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut updates = Vec::with_capacity(self.step.outputs.len());
            for output in &self.step.outputs {
                let raw = row.get(&output.id).cloned().unwrap_or(serde_json::Value::Null);
                let value = Value::coerce(raw, &output.ty).map_err(|e| {
                    WeftError::step(&self.step.id, format!("column '{}': {e}", output.id))
                })?;
                updates.push((output.id.clone(), value));
            }
            messages.push(message.with_values(updates));
        }
        emitter.status(format!("Emitted {} rows from {path}", rows.len()));
        Ok(messages)
    }
}
