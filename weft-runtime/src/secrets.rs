//! ABOUTME: Secret resolution contract and the built-in managers
//! ABOUTME: Resolution failures are a first-class error kind, distinct from validation

use std::collections::HashMap;

use weft_core::{Result, WeftError};
use weft_dsl::model::{SecretReference, SecretValue};

/// Resolves a declarative [`SecretReference`] to a plaintext string.
///
/// Backend implementations (cloud secret stores) live outside the core; the
/// runtime only depends on this contract.
pub trait SecretManager: Send + Sync {
    fn resolve(&self, reference: &SecretReference) -> Result<String>;
}

/// Returns the secret name verbatim. Used by tests and local runs.
#[derive(Debug, Default)]
pub struct NoopSecretManager;

impl SecretManager for NoopSecretManager {
    fn resolve(&self, reference: &SecretReference) -> Result<String> {
        Ok(reference.secret_name.clone())
    }
}

/// In-memory secret store. Secrets may be plain strings or JSON objects;
/// `key` extracts one field of an object secret.
#[derive(Debug, Default)]
pub struct StaticSecretManager {
    entries: HashMap<String, String>,
}

impl StaticSecretManager {
    #[must_use]
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }
}

impl SecretManager for StaticSecretManager {
    fn resolve(&self, reference: &SecretReference) -> Result<String> {
        let raw = self.entries.get(&reference.secret_name).ok_or_else(|| {
            WeftError::SecretResolution {
                message: format!("secret '{}' not found", reference.secret_name),
            }
        })?;
        let Some(key) = &reference.key else {
            return Ok(raw.clone());
        };
        let parsed: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| WeftError::SecretResolution {
                message: format!(
                    "secret '{}' is not a JSON object, cannot extract key '{key}'",
                    reference.secret_name
                ),
            })?;
        match parsed.get(key) {
            Some(serde_json::Value::String(value)) => Ok(value.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(WeftError::SecretResolution {
                message: format!(
                    "key '{key}' not found in secret '{}'",
                    reference.secret_name
                ),
            }),
        }
    }
}

/// Resolve a secret-valued field: literals pass through, references go
/// through the manager.
pub fn resolve_secret_value(value: &SecretValue, manager: &dyn SecretManager) -> Result<String> {
    match value {
        SecretValue::Literal(literal) => Ok(literal.clone()),
        SecretValue::Reference(reference) => manager.resolve(reference),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str, key: Option<&str>) -> SecretReference {
        SecretReference {
            secret_name: name.to_string(),
            key: key.map(String::from),
        }
    }

    #[test]
    fn test_noop_returns_name_verbatim() {
        let manager = NoopSecretManager;
        assert_eq!(
            manager.resolve(&reference("prod/api-key", None)).unwrap(),
            "prod/api-key"
        );
    }

    #[test]
    fn test_static_manager_extracts_json_key() {
        let mut manager = StaticSecretManager::default();
        manager.insert("creds", r#"{"api_key": "sk-1", "other": 2}"#);
        assert_eq!(
            manager.resolve(&reference("creds", Some("api_key"))).unwrap(),
            "sk-1"
        );
        let err = manager
            .resolve(&reference("creds", Some("missing")))
            .unwrap_err();
        assert_eq!(err.kind(), "secret_resolution");
    }

    #[test]
    fn test_missing_secret_is_resolution_error() {
        let manager = StaticSecretManager::default();
        let err = manager.resolve(&reference("ghost", None)).unwrap_err();
        assert_eq!(err.kind(), "secret_resolution");
    }
}
