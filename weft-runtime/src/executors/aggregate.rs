//! ABOUTME: Aggregate executor: pass-through plus a final summary message
//! ABOUTME: Summary counts come from the step's progress tracker

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use weft_core::{FlowMessage, Result, Session, Value, WeftError};
use weft_dsl::semantic::{Step, StepKind};

use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;
use crate::progress::ProgressTracker;

pub struct AggregateExecutor {
    step: Arc<Step>,
    session: Mutex<Option<Arc<Session>>>,
}

impl AggregateExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        if !matches!(step.kind, StepKind::Aggregate) {
            return Err(WeftError::configuration(format!(
                "AggregateExecutor cannot run a {} step",
                step.kind_name()
            )));
        }
        Ok(Self {
            step,
            session: Mutex::new(None),
        })
    }

    fn remember_session(&self, message: &FlowMessage) {
        let mut slot = self.session.lock();
        if slot.is_none() {
            *slot = Some(message.session().clone());
        }
    }
}

#[async_trait]
impl StepExecutor for AggregateExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        self.remember_session(&message);
        Ok(vec![message])
    }

    async fn handle_failed(&self, failed: &[FlowMessage]) -> Result<()> {
        if let Some(first) = failed.first() {
            self.remember_session(first);
        }
        Ok(())
    }

    async fn finalize(
        &self,
        emitter: &StreamEmitter,
        progress: &ProgressTracker,
    ) -> Result<Vec<FlowMessage>> {
        let snapshot = progress.snapshot();
        let session = self
            .session
            .lock()
            .clone()
            .unwrap_or_else(|| Arc::new(Session::new(self.step.id.clone())));
        emitter.status(format!(
            "{} messages processed, {} succeeded, {} failed",
            snapshot.processed, snapshot.succeeded, snapshot.failed
        ));
        #[allow(clippy::cast_possible_wrap)]
        let summary = FlowMessage::new(session).with_values([
            ("num_total", Value::Int(snapshot.processed as i64)),
            ("num_successful", Value::Int(snapshot.succeeded as i64)),
            ("num_failed", Value::Int(snapshot.failed as i64)),
        ]);
        Ok(vec![summary])
    }
}
