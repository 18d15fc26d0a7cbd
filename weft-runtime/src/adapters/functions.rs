//! ABOUTME: Registry of native functions callable as tools
//! ABOUTME: The Rust analogue of module-path + function-name lookup

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use weft_core::{Result, WeftError};

pub type FunctionFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// A registered native function: named JSON in, JSON out.
pub type NativeFunction =
    Arc<dyn Fn(serde_json::Map<String, serde_json::Value>) -> FunctionFuture + Send + Sync>;

/// Functions are addressed as `module_path::function_name`, mirroring the
/// declarative tool descriptor.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, NativeFunction>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(module_path: &str, function_name: &str) -> String {
        format!("{module_path}::{function_name}")
    }

    pub fn register<F, Fut>(
        &self,
        module_path: impl AsRef<str>,
        function_name: impl AsRef<str>,
        function: F,
    ) where
        F: Fn(serde_json::Map<String, serde_json::Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let wrapped: NativeFunction =
            Arc::new(move |args| -> FunctionFuture { Box::pin(function(args)) });
        self.functions.insert(
            Self::key(module_path.as_ref(), function_name.as_ref()),
            wrapped,
        );
    }

    pub fn get(&self, module_path: &str, function_name: &str) -> Result<NativeFunction> {
        self.functions
            .get(&Self::key(module_path, function_name))
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                WeftError::configuration(format!(
                    "function '{function_name}' is not registered in module '{module_path}'"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_invoke() {
        let registry = FunctionRegistry::new();
        registry.register("math", "double", |args| async move {
            let n = args
                .get("n")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or_default();
            Ok(serde_json::json!({"result": n * 2}))
        });

        let function = registry.get("math", "double").unwrap();
        let mut args = serde_json::Map::new();
        args.insert("n".into(), serde_json::json!(21));
        let out = function(args).await.unwrap();
        assert_eq!(out["result"], 42);
    }

    #[test]
    fn test_missing_function_is_configuration_error() {
        let registry = FunctionRegistry::new();
        let err = registry.get("math", "missing").err().unwrap();
        assert_eq!(err.kind(), "configuration");
    }
}
