//! ABOUTME: Content-addressable step cache keyed by message fingerprints
//! ABOUTME: Layout {root}/{namespace}/{step_id}/{version}/{sha256}.json, no eviction

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::{FlowMessage, Result, StepError, Value, VariableSlot, WeftError};
use weft_dsl::semantic::CacheConfig;

/// One cached output message: set variables as canonical JSON, explicitly
/// unset variable ids, and the failure state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMessage {
    pub variables: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl CachedMessage {
    #[must_use]
    pub fn capture(message: &FlowMessage) -> Self {
        let mut variables = serde_json::Map::new();
        let mut unset = Vec::new();
        let mut keys: Vec<&String> = message.variables().keys().collect();
        keys.sort();
        for key in keys {
            match &message.variables()[key] {
                VariableSlot::Set(value) => {
                    variables.insert(key.clone(), value.to_json());
                }
                VariableSlot::Unset => unset.push(key.clone()),
            }
        }
        Self {
            variables,
            unset,
            error: message.error().cloned(),
        }
    }

    /// Rebuild onto the current input message, preserving its session and
    /// telemetry metadata.
    #[must_use]
    pub fn rebuild(&self, input: &FlowMessage) -> FlowMessage {
        let mut updates: Vec<(String, VariableSlot)> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), VariableSlot::Set(Value::from_json(v.clone()))))
            .collect();
        updates.extend(
            self.unset
                .iter()
                .map(|k| (k.clone(), VariableSlot::Unset)),
        );
        let rebuilt = FlowMessage::new(input.session().clone()).with_variables(updates);
        match &self.error {
            Some(error) => rebuilt.with_error_record(error.clone()),
            None => rebuilt,
        }
    }
}

/// The cached outcome of one `process_message` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedOutcome {
    pub outputs: Vec<CachedMessage>,
}

/// Filesystem-backed step cache. Entries are written once per key;
/// concurrent writers of one key produce the same value by construction.
#[derive(Debug)]
pub struct StepCache {
    directory: PathBuf,
}

impl StepCache {
    /// Open (creating directories) the cache for one step.
    pub fn open(config: &CacheConfig, step_id: &str) -> Result<Self> {
        let mut directory = PathBuf::from(&config.directory);
        if let Some(namespace) = &config.namespace {
            directory.push(namespace);
        }
        directory.push(step_id);
        directory.push(&config.version);
        fs::create_dir_all(&directory).map_err(|e| WeftError::Configuration {
            message: format!("cannot create cache directory '{}': {e}", directory.display()),
        })?;
        Ok(Self { directory })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }

    pub fn lookup(&self, key: &str) -> Result<Option<CachedOutcome>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| WeftError::Internal {
            message: format!("cache read '{}' failed: {e}", path.display()),
        })?;
        let outcome = serde_json::from_slice(&bytes).map_err(|e| WeftError::Internal {
            message: format!("cache entry '{}' is corrupt: {e}", path.display()),
        })?;
        debug!(key, path = %path.display(), "cache hit");
        Ok(Some(outcome))
    }

    pub fn store(&self, key: &str, outcome: &CachedOutcome) -> Result<()> {
        let path = self.entry_path(key);
        let bytes = serde_json::to_vec(outcome).map_err(|e| WeftError::Internal {
            message: format!("cache serialization failed: {e}"),
        })?;
        // Write-then-rename keeps readers from observing partial entries.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).and_then(|()| fs::rename(&tmp, &path)).map_err(|e| {
            WeftError::Internal {
                message: format!("cache write '{}' failed: {e}", path.display()),
            }
        })?;
        Ok(())
    }
}

/// Capture a full outcome from emitted messages.
#[must_use]
pub fn capture_outcome(outputs: &[FlowMessage]) -> CachedOutcome {
    CachedOutcome {
        outputs: outputs.iter().map(CachedMessage::capture).collect(),
    }
}

/// Rebuild all cached outputs onto the current input.
#[must_use]
pub fn rebuild_outcome(outcome: &CachedOutcome, input: &FlowMessage) -> Vec<FlowMessage> {
    outcome
        .outputs
        .iter()
        .map(|cached| cached.rebuild(input))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_core::Session;

    fn config(dir: &std::path::Path) -> CacheConfig {
        CacheConfig {
            directory: dir.to_string_lossy().into_owned(),
            namespace: Some("tests".into()),
            version: "v1".into(),
        }
    }

    fn message() -> FlowMessage {
        FlowMessage::new(Arc::new(Session::new("s")))
    }

    #[test]
    fn test_layout_includes_namespace_step_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StepCache::open(&config(dir.path()), "my_step").unwrap();
        let expected = dir.path().join("tests").join("my_step").join("v1");
        assert!(expected.is_dir());
        assert_eq!(cache.directory, expected);
    }

    #[test]
    fn test_roundtrip_preserves_canonical_output() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StepCache::open(&config(dir.path()), "step").unwrap();

        let input = message().with_values([("q", Value::from("hello"))]);
        let output = input.with_values([("a", Value::Int(7)), ("n", Value::Null)]);
        let key = input.fingerprint();
        cache.store(&key, &capture_outcome(&[output.clone()])).unwrap();

        let rebuilt = rebuild_outcome(&cache.lookup(&key).unwrap().unwrap(), &input);
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(
            rebuilt[0].canonical_json().to_string(),
            output.canonical_json().to_string()
        );
    }

    #[test]
    fn test_failed_outcome_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StepCache::open(&config(dir.path()), "step").unwrap();

        let input = message().with_values([("q", Value::from("x"))]);
        let failed = input.with_error("step", &WeftError::step("step", "bad input"));
        cache
            .store(&input.fingerprint(), &capture_outcome(&[failed.clone()]))
            .unwrap();

        let rebuilt = rebuild_outcome(
            &cache.lookup(&input.fingerprint()).unwrap().unwrap(),
            &input,
        );
        assert!(rebuilt[0].is_failed());
        assert!(rebuilt[0]
            .error()
            .unwrap()
            .error_message
            .contains("bad input"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StepCache::open(&config(dir.path()), "step").unwrap();
        assert!(cache.lookup("deadbeef").unwrap().is_none());
    }
}
