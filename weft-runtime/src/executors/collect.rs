//! ABOUTME: Collect executor: concatenates the whole stream into one list output
//! ABOUTME: Only variables present in every input message propagate to the result

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use weft_core::{FlowMessage, Result, Value, VariableSlot, WeftError};
use weft_dsl::semantic::{Step, StepKind};

use crate::emitter::StreamEmitter;
use crate::executor::BatchedStepExecutor;
use crate::progress::ProgressTracker;

pub struct CollectExecutor {
    step: Arc<Step>,
    buffer: Mutex<Vec<FlowMessage>>,
}

impl CollectExecutor {
    pub fn new(step: Arc<Step>) -> Result<Self> {
        if !matches!(step.kind, StepKind::Collect) {
            return Err(WeftError::configuration(format!(
                "CollectExecutor cannot run a {} step",
                step.kind_name()
            )));
        }
        Ok(Self {
            step,
            buffer: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BatchedStepExecutor for CollectExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_batch(
        &self,
        batch: Vec<FlowMessage>,
        _emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        self.buffer.lock().extend(batch);
        Ok(Vec::new())
    }

    async fn finalize(
        &self,
        _emitter: &StreamEmitter,
        _progress: &ProgressTracker,
    ) -> Result<Vec<FlowMessage>> {
        let collected: Vec<FlowMessage> = std::mem::take(&mut *self.buffer.lock());
        let Some(first) = collected.first() else {
            return Ok(Vec::new());
        };
        let input = &self.step.inputs[0];
        let output = &self.step.outputs[0];

        let items = collected
            .iter()
            .map(|message| message.variable(&input.id).cloned())
            .collect::<Result<Vec<Value>>>()?;

        // Variables unique to some inputs are dropped; the survivors keep the
        // value they had on the first message.
        let mut shared: HashSet<String> = first
            .variables()
            .iter()
            .filter(|(_, slot)| slot.is_set())
            .map(|(key, _)| key.clone())
            .collect();
        for message in &collected[1..] {
            shared.retain(|key| message.is_set(key));
        }
        shared.remove(&input.id);

        let mut updates: Vec<(String, VariableSlot)> = shared
            .into_iter()
            .filter_map(|key| {
                first
                    .variables()
                    .get(&key)
                    .cloned()
                    .map(|slot| (key, slot))
            })
            .collect();
        updates.push((output.id.clone(), VariableSlot::Set(Value::List(items))));

        let result = FlowMessage::new(first.session().clone()).with_variables(updates);
        Ok(vec![result])
    }
}
