//! ABOUTME: FileSink executor: accumulates rows and writes once on finalize
//! ABOUTME: Failed messages land in a sibling errors parquet when an error dir is set

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::semantic::{PathBinding, Step, StepKind};

use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;
use crate::progress::ProgressTracker;
use crate::tabular::{self, Row};

pub struct FileSinkExecutor {
    step: Arc<Step>,
    path: PathBinding,
    error_dir: Option<String>,
    rows: Mutex<Vec<Row>>,
    resolved_path: Mutex<Option<String>>,
    base: Mutex<Option<FlowMessage>>,
}

impl FileSinkExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        let StepKind::FileSink { path, error_dir } = &step.kind else {
            return Err(WeftError::configuration(format!(
                "FileSinkExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let (path, error_dir) = (path.clone(), error_dir.clone());
        Ok(Self {
            step,
            path,
            error_dir,
            rows: Mutex::new(Vec::new()),
            resolved_path: Mutex::new(None),
            base: Mutex::new(None),
        })
    }
}

#[async_trait]
impl StepExecutor for FileSinkExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let mut row = Row::new();
        for input in &self.step.inputs {
            let value = match message.get(&input.id) {
                Some(value) => value.to_json(),
                None if input.optional => serde_json::Value::Null,
                None => {
                    return Err(WeftError::step(
                        &self.step.id,
                        format!("required variable '{}' is not set", input.id),
                    ));
                }
            };
            row.insert(input.id.clone(), value);
        }
        self.rows.lock().push(row);

        if let PathBinding::Variable(var) = &self.path {
            let mut resolved = self.resolved_path.lock();
            if resolved.is_none() {
                *resolved = Some(message.variable(&var.id)?.render_text());
            }
        }
        let mut base = self.base.lock();
        if base.is_none() {
            *base = Some(message);
        }
        Ok(Vec::new())
    }

    async fn handle_failed(&self, failed: &[FlowMessage]) -> Result<()> {
        let Some(error_dir) = &self.error_dir else {
            return Ok(());
        };
        let rows: Vec<Row> = failed
            .iter()
            .map(|message| {
                let mut row = Row::new();
                row.insert(
                    "reason".to_string(),
                    serde_json::Value::String(
                        message
                            .error()
                            .map(|e| e.error_message.clone())
                            .unwrap_or_default(),
                    ),
                );
                row.insert("message".to_string(), message.canonical_json());
                row
            })
            .collect();
        let path = format!("{error_dir}/{}.errors.parquet", self.step.id);
        tabular::write_rows(&path, &rows)
    }

    async fn finalize(
        &self,
        emitter: &StreamEmitter,
        _progress: &ProgressTracker,
    ) -> Result<Vec<FlowMessage>> {
        let rows: Vec<Row> = std::mem::take(&mut *self.rows.lock());
        let path = match &self.path {
            PathBinding::Constant(uri) => uri.clone(),
            PathBinding::Variable(var) => {
                self.resolved_path.lock().clone().ok_or_else(|| {
                    WeftError::step(
                        &self.step.id,
                        format!("path variable '{}' never arrived", var.id),
                    )
                })?
            }
        };
        emitter.status(format!("Writing {} records to {path}", rows.len()));
        let written = rows.len();
        tokio::task::spawn_blocking(move || tabular::write_rows(&path, &rows))
            .await
            .map_err(|e| WeftError::internal(format!("sink write task failed: {e}")))??;

        let Some(base) = self.base.lock().clone() else {
            return Ok(Vec::new());
        };
        let result = match self.step.outputs.first() {
            #[allow(clippy::cast_possible_wrap)]
            Some(output) => {
                base.with_values([(output.id.clone(), Value::Int(written as i64))])
            }
            None => base,
        };
        emitter.status(format!("Wrote {written} records"));
        Ok(vec![result])
    }
}
