//! ABOUTME: SQLSource executor: parameterized query, one output message per row
//! ABOUTME: Cloud auth sessions substitute credential placeholders in the connection string

use std::sync::Arc;
use std::sync::Once;

use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Column, Row as SqlxRow};
use tokio::sync::OnceCell;

use weft_core::{FlowMessage, PrimitiveType, Result, Value, VarType, WeftError};
use weft_dsl::semantic::{AuthProvider, Step, StepKind};

use crate::auth::AuthSession;
use crate::context::ExecutorContext;
use crate::emitter::StreamEmitter;
use crate::executor::StepExecutor;

static INSTALL_DRIVERS: Once = Once::new();

pub struct SqlSourceExecutor {
    step: Arc<Step>,
    query: String,
    connection: String,
    auth: Option<Arc<AuthProvider>>,
    pool: OnceCell<AnyPool>,
    ctx: ExecutorContext,
}

impl SqlSourceExecutor {
    pub fn new(step: Arc<Step>, ctx: ExecutorContext) -> Result<Self> {
        let StepKind::SqlSource {
            query,
            connection,
            auth,
        } = &step.kind
        else {
            return Err(WeftError::configuration(format!(
                "SqlSourceExecutor cannot run a {} step",
                step.kind_name()
            )));
        };
        let (query, connection, auth) = (query.clone(), connection.clone(), auth.clone());
        Ok(Self {
            step,
            query,
            connection,
            auth,
            pool: OnceCell::new(),
            ctx,
        })
    }

    /// Connection string with `{access_key_id}` / `{secret_access_key}` /
    /// `{session_token}` placeholders filled from the provider session.
    async fn connection_string(&self) -> Result<String> {
        let Some(provider) = &self.auth else {
            return Ok(self.connection.clone());
        };
        let session = self.ctx.auth.session(provider).await?;
        let AuthSession::Cloud(cloud) = session else {
            return Ok(self.connection.clone());
        };
        Ok(self
            .connection
            .replace("{access_key_id}", &cloud.access_key_id)
            .replace("{secret_access_key}", &cloud.secret_access_key)
            .replace(
                "{session_token}",
                cloud.session_token.as_deref().unwrap_or(""),
            ))
    }

    async fn pool(&self) -> Result<&AnyPool> {
        let connection = self.connection_string().await?;
        let step_id = self.step.id.clone();
        self.pool
            .get_or_try_init(|| async move {
                INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
                AnyPoolOptions::new()
                    .max_connections(4)
                    .connect(&connection)
                    .await
                    .map_err(|e| WeftError::Configuration {
                        message: format!("SQL source '{step_id}' cannot connect: {e}"),
                    })
            })
            .await
    }

    fn row_value(
        &self,
        row: &sqlx::any::AnyRow,
        column: &str,
        ty: &VarType,
    ) -> Result<serde_json::Value> {
        let fetch_error = |e: sqlx::Error| {
            WeftError::step(&self.step.id, format!("column '{column}': {e}"))
        };
        match ty {
            VarType::Primitive(PrimitiveType::Int) => row
                .try_get::<i64, _>(column)
                .map(serde_json::Value::from)
                .map_err(fetch_error),
            VarType::Primitive(PrimitiveType::Float) => row
                .try_get::<f64, _>(column)
                .map(serde_json::Value::from)
                .map_err(fetch_error),
            VarType::Primitive(PrimitiveType::Boolean) => row
                .try_get::<bool, _>(column)
                .map(serde_json::Value::from)
                .map_err(fetch_error),
            _ => row
                .try_get::<Option<String>, _>(column)
                .map(|value| match value {
                    Some(text) => serde_json::Value::String(text),
                    None => serde_json::Value::Null,
                })
                .map_err(fetch_error),
        }
    }
}

#[async_trait]
impl StepExecutor for SqlSourceExecutor {
    fn step(&self) -> &Arc<Step> {
        &self.step
    }

    async fn process_message(
        &self,
        message: FlowMessage,
        emitter: &StreamEmitter,
    ) -> Result<Vec<FlowMessage>> {
        let pool = self.pool().await?;
        emitter.status(format!("Running query for step {}", self.step.id));

        // Declared inputs bind positionally, in declaration order.
        let mut query = sqlx::query(&self.query);
        for input in &self.step.inputs {
            let value = message.variable(&input.id)?;
            query = match value {
                Value::Int(i) => query.bind(*i),
                Value::Float(f) => query.bind(*f),
                Value::Bool(b) => query.bind(*b),
                other => query.bind(other.render_text()),
            };
        }
        let rows = query.fetch_all(pool).await.map_err(|e| {
            WeftError::step(&self.step.id, format!("query failed: {e}"))
        })?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let columns: Vec<&str> = row.columns().iter().map(Column::name).collect();
            let mut updates = Vec::with_capacity(self.step.outputs.len());
            for output in &self.step.outputs {
                if !columns.contains(&output.id.as_str()) {
                    return Err(WeftError::step(
                        &self.step.id,
                        format!(
                            "query result is missing column '{}'; available: {}",
                            output.id,
                            columns.join(", ")
                        ),
                    ));
                }
                let raw = self.row_value(row, &output.id, &output.ty)?;
                let value = Value::coerce(raw, &output.ty).map_err(|e| {
                    WeftError::step(&self.step.id, format!("column '{}': {e}", output.id))
                })?;
                updates.push((output.id.clone(), value));
            }
            messages.push(message.with_values(updates));
        }
        emitter.status(format!("Query returned {} rows", rows.len()));
        Ok(messages)
    }
}
