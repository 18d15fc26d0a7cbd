//! ABOUTME: Flow runner: chains step executors over lazy message streams
//! ABOUTME: Strict FIFO between steps; cancellation is cooperative

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use weft_core::{FlowMessage, Result, Session, WeftError};
use weft_dsl::semantic::Flow;

use crate::context::ExecutorContext;
use crate::executor::{execute_step, message_stream};
use crate::factory::create_executor;

/// Execute a flow over the given initial messages and collect the results.
///
/// An empty input is normalized to one synthetic empty message so source
/// steps (those declaring no inputs) still execute exactly once. Executors
/// are chained stream-to-stream in step order; between steps the sequence is
/// strict FIFO. Cancelling the context's token discards in-flight messages
/// and surfaces `Cancelled`; a step running under error mode `Fail` aborts
/// the run with its error.
pub async fn run_flow(
    flow: &Arc<Flow>,
    initial: Vec<FlowMessage>,
    ctx: &ExecutorContext,
) -> Result<Vec<FlowMessage>> {
    let initial = if initial.is_empty() {
        vec![FlowMessage::new(Arc::new(Session::new(
            Uuid::new_v4().to_string(),
        )))]
    } else {
        initial
    };
    info!(flow = %flow.id, messages = initial.len(), steps = flow.steps.len(), "running flow");

    let mut stream = message_stream(initial);
    for step in &flow.steps {
        let executor = create_executor(step, ctx)?;
        debug!(flow = %flow.id, step = %step.id, kind = step.kind_name(), "chaining step");
        stream = execute_step(executor, ctx.clone(), stream);
    }

    let mut results = Vec::new();
    while let Some(message) = stream.next().await {
        if ctx.cancellation.is_cancelled() {
            return Err(WeftError::Cancelled);
        }
        results.push(message);
    }
    if let Some(error) = ctx.take_run_error() {
        return Err(error);
    }
    if ctx.cancellation.is_cancelled() {
        return Err(WeftError::Cancelled);
    }
    debug!(flow = %flow.id, results = results.len(), "flow complete");
    Ok(results)
}
