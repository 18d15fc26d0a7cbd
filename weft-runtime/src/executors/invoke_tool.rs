//! ABOUTME: Tool invocation executor: explicit input/output bindings around a tool call
//! ABOUTME: Native functions come from the registry; HTTP tools go through reqwest

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use weft_core::{FlowMessage, Result, Value, WeftError};
use weft_dsl::semantic::{Step, StepKind, Tool, ToolSpec};

use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;
use crate::telemetry::SpanKind;

pub struct InvokeToolExecutor {
    step: Arc<Step>,
    tool: Arc<Tool>,
    input_bindings: BTreeMap<String, String>,
    output_bindings: BTreeMap<String, String>,
    ctx: ExecutorContext,
}

impl InvokeToolExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::InvokeTool {
            tool,
            input_bindings,
            output_bindings,
        } = &step.kind
        else {
            return Err(WeftError::configuration(format!(
                "InvokeToolExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let (tool, input_bindings, output_bindings) =
            (tool.clone(), input_bindings.clone(), output_bindings.clone());
        Ok(Self {
            step,
            tool,
            input_bindings,
            output_bindings,
            ctx,
        })
    }

    fn prepare_inputs(
        &self,
        message: &FlowMessage,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut inputs = serde_json::Map::new();
        for (param_name, var_id) in &self.input_bindings {
            let param = self.tool.inputs.get(param_name).ok_or_else(|| {
                WeftError::step(
                    &self.step.id,
                    format!("tool parameter '{param_name}' is not defined"),
                )
            })?;
            match message.get(var_id) {
                Some(value) => {
                    inputs.insert(param_name.clone(), value.to_json());
                }
                None if param.optional => {}
                None => {
                    return Err(WeftError::step(
                        &self.step.id,
                        format!(
                            "required input '{var_id}' for tool parameter '{param_name}' is missing"
                        ),
                    ));
                }
            }
        }
        Ok(inputs)
    }

    fn extract_outputs(&self, result: &serde_json::Value) -> Result<Vec<(String, Value)>> {
        let mut outputs = Vec::new();
        for (param_name, var_id) in &self.output_bindings {
            let param = self.tool.outputs.get(param_name).ok_or_else(|| {
                WeftError::step(
                    &self.step.id,
                    format!("tool output '{param_name}' is not defined"),
                )
            })?;
            let raw = match result {
                serde_json::Value::Object(map) => map.get(param_name).cloned(),
                // Single-output tools may return the bare value.
                other if self.output_bindings.len() == 1 => Some(other.clone()),
                _ => None,
            };
            match raw {
                Some(raw) => {
                    let value = Value::coerce(raw.clone(), &param.ty)
                        .unwrap_or_else(|_| Value::from_json(raw));
                    outputs.push((var_id.clone(), value));
                }
                None if param.optional => {}
                None => {
                    return Err(WeftError::step(
                        &self.step.id,
                        format!("required output '{param_name}' not found in tool result"),
                    ));
                }
            }
        }
        Ok(outputs)
    }
}

#[async_trait]
impl StepExecutor for InvokeToolExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Tool
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let inputs = self.prepare_inputs(&message)?;
        let call_id = format!("call-{}", Uuid::new_v4().simple());
        emitter.tool_start(
            &call_id,
            &self.tool.name,
            serde_json::Value::Object(inputs.clone()),
        );

        match execute_tool(&self.ctx, &self.tool, inputs, emitter).await {
            Ok(result) => {
                emitter.tool_end(&call_id, result.clone());
                let outputs = self.extract_outputs(&result)?;
                Ok(vec![message.with_values(outputs)])
            }
            Err(error) => {
                emitter.tool_error(&call_id, error.to_string());
                Err(error)
            }
        }
    }
}

/// Invoke a tool with prepared inputs. Shared with the agent executor.
pub async fn execute_tool(
    ctx: &ExecutorContext,
    tool: &Tool,
    inputs: serde_json::Map<String, serde_json::Value>,
    emitter: &StreamEmitter,
) -> Result<serde_json::Value> {
    match &tool.spec {
        ToolSpec::Function {
            module_path,
            function_name,
        } => {
            emitter.status(format!("Calling function {module_path}::{function_name}"));
            let function = ctx.functions.get(module_path, function_name)?;
            let result = function(inputs).await?;
            emitter.status(format!("Function {function_name} completed"));
            Ok(result)
        }
        ToolSpec::Api {
            endpoint,
            method,
            headers,
            auth,
        } => {
            let method = method.to_ascii_uppercase();
            emitter.status(format!("Making {method} request to {endpoint}"));

            let http_method: reqwest::Method = method.parse().map_err(|_| {
                WeftError::configuration(format!("tool '{}' has invalid method '{method}'", tool.id))
            })?;
            let mut request = ctx.http.request(http_method, endpoint);
            for (name, value) in headers {
                request = request.header(name, value);
            }
            if let Some(provider) = auth {
                let session = ctx.auth.session(provider).await?;
                if let Some(header) = session.bearer_header() {
                    request = request.header("Authorization", header);
                }
            }

            // GET/DELETE carry bindings as query params, body methods as JSON.
            request = if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
                request.json(&serde_json::Value::Object(inputs))
            } else {
                let query: Vec<(String, String)> = inputs
                    .iter()
                    .map(|(key, value)| {
                        let rendered = match value {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (key.clone(), rendered)
                    })
                    .collect();
                request.query(&query)
            };

            let response = request
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| WeftError::Adapter {
                    message: format!("tool '{}' request failed", tool.id),
                    source: Some(Box::new(e)),
                })?;
            response.json().await.map_err(|e| WeftError::Adapter {
                message: format!("tool '{}' returned a non-JSON response", tool.id),
                source: Some(Box::new(e)),
            })
        }
    }
}
