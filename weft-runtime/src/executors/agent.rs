//! ABOUTME: Agent executor: LLM inference with a bounded tool-call loop
//! ABOUTME: Tool executions surface as start/end/error events on the stream

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{
    ChatMessage, ChatRole, DomainTypeKind, FlowMessage, PrimitiveType, Result, Value, VarType,
    WeftError,
};
use weft_dsl::semantic::{Memory, Model, Step, StepKind, Tool, ToolParameter};

use crate::adapters::llm::ToolSchema;
use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;
use crate::executors::invoke_tool::execute_tool;
use crate::telemetry::SpanKind;

const MAX_TOOL_ROUNDS: usize = 8;

pub struct AgentExecutor {
    step: Arc<Step>,
    model: Arc<Model>,
    system_message: Option<String>,
    memory: Option<Arc<Memory>>,
    tools: Vec<Arc<Tool>>,
    ctx: ExecutorContext,
}

impl AgentExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::Agent {
            model,
            system_message,
            memory,
            tools,
        } = &step.kind
        else {
            return Err(WeftError::configuration(format!(
                "AgentExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let (model, system_message, memory, tools) = (
            model.clone(),
            system_message.clone(),
            memory.clone(),
            tools.clone(),
        );
        Ok(Self {
            step,
            model,
            system_message,
            memory,
            tools,
            ctx,
        })
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|tool| ToolSchema {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: parameters_schema(&tool.inputs),
            })
            .collect()
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<Tool>> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

fn parameters_schema(
    inputs: &std::collections::BTreeMap<String, ToolParameter>,
) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (name, param) in inputs {
        properties.insert(
            name.clone(),
            serde_json::json!({"type": json_schema_type(&param.ty)}),
        );
        if !param.optional {
            required.push(serde_json::Value::String(name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn json_schema_type(ty: &VarType) -> &'static str {
    match ty {
        VarType::Primitive(PrimitiveType::Int) => "integer",
        VarType::Primitive(PrimitiveType::Float) => "number",
        VarType::Primitive(PrimitiveType::Boolean) => "boolean",
        VarType::List(_) => "array",
        VarType::Custom(_) | VarType::Domain(_) => "object",
        VarType::Primitive(_) => "string",
    }
}

#[async_trait]
impl StepExecutor for AgentExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Chain
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let output = &self.step.outputs[0];
        let auth = match &self.model.auth {
            Some(provider) => Some(self.ctx.auth.session(provider).await?),
            None => None,
        };
        let adapter = self.ctx.llm_factory.adapter(&self.model, auth.as_ref())?;
        let mut params = self.model.inference_params.clone();
        params.remove("base_url");
        let schemas = self.tool_schemas();

        // Seed the conversation: memory, else session history, plus this
        // turn's chat or text inputs.
        let mut turn_inputs: Vec<ChatMessage> = Vec::new();
        for input in &self.step.inputs {
            match message.get(&input.id) {
                Some(Value::Chat(chat)) => turn_inputs.push(chat.clone()),
                Some(Value::Text(text)) => {
                    turn_inputs.push(ChatMessage::new(ChatRole::User, text.clone()));
                }
                _ => {}
            }
        }
        let mut messages = if let Some(memory) = &self.memory {
            let slot = self
                .ctx
                .memory
                .slot(&message.session().session_id, &memory.id);
            let mut guard = slot.lock().await;
            guard.extend(turn_inputs);
            guard.clone()
        } else {
            let mut merged = message.session().conversation_history.clone();
            merged.extend(turn_inputs);
            merged
        };
        if let Some(system) = &self.system_message {
            if !messages.first().is_some_and(|m| m.role == ChatRole::System) {
                messages.insert(0, ChatMessage::new(ChatRole::System, system.clone()));
            }
        }

        let mut response = adapter.chat(&messages, &schemas, &params).await?;
        let mut rounds = 0;
        while !response.tool_calls.is_empty() {
            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                return Err(WeftError::step(
                    &self.step.id,
                    format!("tool loop exceeded {MAX_TOOL_ROUNDS} rounds"),
                ));
            }
            messages.push(response.message.clone());
            for call in &response.tool_calls {
                let Some(tool) = self.find_tool(&call.tool_name) else {
                    emitter.tool_error(&call.call_id, format!("unknown tool '{}'", call.tool_name));
                    messages.push(ChatMessage::new(
                        ChatRole::Tool,
                        format!("error: unknown tool '{}'", call.tool_name),
                    ));
                    continue;
                };
                let inputs = call
                    .arguments
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                emitter.tool_start(&call.call_id, &tool.name, call.arguments.clone());
                match execute_tool(&self.ctx, tool, inputs, emitter).await {
                    Ok(result) => {
                        emitter.tool_end(&call.call_id, result.clone());
                        messages.push(ChatMessage::new(ChatRole::Tool, result.to_string()));
                    }
                    Err(error) => {
                        emitter.tool_error(&call.call_id, error.to_string());
                        messages.push(ChatMessage::new(
                            ChatRole::Tool,
                            format!("error: {error}"),
                        ));
                    }
                }
            }
            response = adapter.chat(&messages, &schemas, &params).await?;
        }

        if let Some(memory) = &self.memory {
            let slot = self
                .ctx
                .memory
                .slot(&message.session().session_id, &memory.id);
            slot.lock().await.push(response.message.clone());
        }
        if emitter.is_active() {
            let stream = emitter.text_stream(format!("agent-{}", self.step.id));
            stream.delta(response.message.text());
        }

        let value = if matches!(output.ty, VarType::Domain(DomainTypeKind::ChatMessage)) {
            Value::Chat(response.message)
        } else {
            Value::Text(response.message.text())
        };
        let mut updates = vec![(output.id.clone(), value)];
        if let Some(reasoning) = response.reasoning {
            updates.push(("reasoning".to_string(), Value::Text(reasoning)));
        }
        Ok(vec![message.with_values(updates)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_schema_marks_required() {
        let mut inputs = std::collections::BTreeMap::new();
        inputs.insert(
            "city".to_string(),
            ToolParameter {
                ty: VarType::Primitive(PrimitiveType::Text),
                optional: false,
            },
        );
        inputs.insert(
            "units".to_string(),
            ToolParameter {
                ty: VarType::Primitive(PrimitiveType::Text),
                optional: true,
            },
        );
        let schema = parameters_schema(&inputs);
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["required"], serde_json::json!(["city"]));
    }
}
