//! ABOUTME: LLM inference executor: completion or chat keyed on the output variable type
//! ABOUTME: Memory state replaces the input list when declared; session history otherwise

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use weft_core::{
    ChatMessage, ChatRole, DomainTypeKind, FlowMessage, Result, Value, VarType, WeftError,
};
use weft_dsl::semantic::{Memory, Model, Step, StepKind};

use crate::adapters::llm::{ChatDelta, ChatResponse, LanguageModelAdapter};
use crate::context::ExecutorContext;
use crate::emitter::{IncrementalStream, StreamEmitter};
use crate::executor::StepExecutor;
use crate::telemetry::SpanKind;

pub struct LlmInferenceExecutor {
    step: Arc<Step>,
    model: Arc<Model>,
    system_message: Option<String>,
    memory: Option<Arc<Memory>>,
    ctx: ExecutorContext,
}

impl LlmInferenceExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::LlmInference {
            model,
            system_message,
            memory,
        } = &step.kind
        else {
            return Err(WeftError::configuration(format!(
                "LlmInferenceExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let (model, system_message, memory) =
            (model.clone(), system_message.clone(), memory.clone());
        Ok(Self {
            step,
            model,
            system_message,
            memory,
            ctx,
        })
    }

    async fn adapter(&self) -> Result<Arc<dyn LanguageModelAdapter>> {
        let auth = match &self.model.auth {
            Some(provider) => Some(self.ctx.auth.session(provider).await?),
            None => None,
        };
        self.ctx.llm_factory.adapter(&self.model, auth.as_ref())
    }

    fn params(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut params = self.model.inference_params.clone();
        // base_url configures the adapter, not the request.
        params.remove("base_url");
        params
    }

    /// Run a chat exchange, streaming deltas when a callback is present.
    async fn exchange(
        &self,
        adapter: &Arc<dyn LanguageModelAdapter>,
        messages: &[ChatMessage],
        emitter: &StreamEmitter,
        message_tag: &str,
    ) -> Result<ChatResponse> {
        let params = self.params();
        if emitter.is_active() {
            let stream_id = format!("llm-{}-{message_tag}", self.step.id);
            let text = emitter.text_stream(stream_id.clone());
            let reasoning: Mutex<Option<IncrementalStream>> = Mutex::new(None);
            let reasoning_emitter = emitter.clone();
            let reasoning_id = format!("{stream_id}-reasoning");
            let on_delta = move |delta: ChatDelta| match delta {
                ChatDelta::Text(chunk) => {
                    if !chunk.trim().is_empty() {
                        text.delta(chunk);
                    }
                }
                ChatDelta::Reasoning(chunk) => {
                    let mut guard = reasoning.lock();
                    let stream = guard.get_or_insert_with(|| {
                        reasoning_emitter.reasoning_stream(reasoning_id.clone())
                    });
                    stream.delta(chunk);
                }
            };
            adapter.stream_chat(messages, &[], &params, &on_delta).await
        } else {
            adapter.chat(messages, &[], &params).await
        }
    }

    /// Assemble the message list: declared memory wins over session history;
    /// the system message is prepended when the list does not start with one.
    async fn assemble_messages(
        &self,
        message: &FlowMessage,
        turn_inputs: Vec<ChatMessage>,
    ) -> Vec<ChatMessage> {
        let mut messages = if let Some(memory) = &self.memory {
            let slot = self
                .ctx
                .memory
                .slot(&message.session().session_id, &memory.id);
            let mut guard = slot.lock().await;
            guard.extend(turn_inputs);
            // Rough token estimate: four characters per token. When over the
            // limit, drop whole turns from the front in flush-sized bites.
            let estimate =
                |messages: &[ChatMessage]| messages.iter().map(|m| m.text().len() / 4).sum::<usize>();
            while estimate(&guard) > memory.token_limit && guard.len() > 1 {
                let mut dropped = 0;
                while dropped < memory.token_flush_size && guard.len() > 1 {
                    let first = guard.remove(0);
                    dropped += first.text().len() / 4;
                }
            }
            guard.clone()
        } else {
            let mut merged = message.session().conversation_history.clone();
            merged.extend(turn_inputs);
            merged
        };
        if let Some(system) = &self.system_message {
            let starts_with_system = messages
                .first()
                .is_some_and(|m| m.role == ChatRole::System);
            if !starts_with_system {
                messages.insert(0, ChatMessage::new(ChatRole::System, system.clone()));
            }
        }
        messages
    }

    async fn remember_reply(&self, message: &FlowMessage, reply: &ChatMessage) {
        if let Some(memory) = &self.memory {
            let slot = self
                .ctx
                .memory
                .slot(&message.session().session_id, &memory.id);
            slot.lock().await.push(reply.clone());
        }
    }
}

#[async_trait]
impl StepExecutor for LlmInferenceExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Llm
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let output = &self.step.outputs[0];
        let adapter = self.adapter().await?;
        let tag = Uuid::new_v4().simple().to_string();

        let chat_output = matches!(output.ty, VarType::Domain(DomainTypeKind::ChatMessage));
        if chat_output {
            let turn_inputs: Vec<ChatMessage> = self
                .step
                .inputs
                .iter()
                .filter_map(|input| match message.get(&input.id) {
                    Some(Value::Chat(chat)) => Some(chat.clone()),
                    _ => None,
                })
                .collect();
            let messages = self.assemble_messages(&message, turn_inputs).await;
            let response = self.exchange(&adapter, &messages, emitter, &tag).await?;
            self.remember_reply(&message, &response.message).await;

            let mut updates = vec![(
                output.id.clone(),
                Value::Chat(response.message.clone()),
            )];
            if let Some(reasoning) = response.reasoning {
                updates.push(("reasoning".to_string(), Value::Text(reasoning)));
            }
            Ok(vec![message.with_values(updates)])
        } else {
            let input = &self.step.inputs[0];
            let prompt = message.variable(&input.id)?.render_text();
            let (text, reasoning) = if emitter.is_active() {
                let turn = vec![ChatMessage::new(ChatRole::User, prompt)];
                let response = self.exchange(&adapter, &turn, emitter, &tag).await?;
                (response.message.text(), response.reasoning)
            } else {
                let response = adapter.complete(&prompt, &self.params()).await?;
                (response.text, response.reasoning)
            };

            let mut updates = vec![(output.id.clone(), Value::Text(text))];
            // Terminal reasoning content rides along as its own variable.
            if let Some(reasoning) = reasoning {
                updates.push(("reasoning".to_string(), Value::Text(reasoning)));
            }
            Ok(vec![message.with_values(updates)])
        }
    }
}

