//! ABOUTME: YAML document loading with env-var substitution and include tags
//! ABOUTME: `${VAR}` / `${VAR:default}` expansion, `!include` splicing, `!include_raw` inlining

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::value::TaggedValue;
use serde_yaml::Value;
use tracing::debug;

use weft_core::{Result, WeftError};

use crate::model::DocumentRoot;

/// Where a document (or include) was loaded from; resolves relative paths.
#[derive(Debug, Clone)]
enum DocumentBase {
    Local(PathBuf),
    Remote(String),
}

impl DocumentBase {
    fn parse(location: &str) -> Self {
        if location.contains("://") {
            Self::Remote(location.to_string())
        } else {
            Self::Local(PathBuf::from(location))
        }
    }

    /// Resolve a path relative to this document. Absolute paths and URLs
    /// pass through unchanged.
    fn resolve(&self, target: &str) -> Self {
        if target.contains("://") {
            return Self::Remote(target.to_string());
        }
        match self {
            Self::Local(path) => {
                let target_path = Path::new(target);
                if target_path.is_absolute() {
                    Self::Local(target_path.to_path_buf())
                } else {
                    let parent = path.parent().unwrap_or_else(|| Path::new("."));
                    Self::Local(parent.join(target_path))
                }
            }
            Self::Remote(url) => {
                if target.starts_with('/') {
                    // Scheme and host preserved, path replaced.
                    let prefix: String = url
                        .splitn(4, '/')
                        .take(3)
                        .collect::<Vec<_>>()
                        .join("/");
                    Self::Remote(format!("{prefix}{target}"))
                } else {
                    let base = url.rsplit_once('/').map_or(url.as_str(), |(b, _)| b);
                    Self::Remote(format!("{base}/{target}"))
                }
            }
        }
    }

    fn read(&self) -> Result<String> {
        match self {
            Self::Local(path) => fs::read_to_string(path).map_err(|e| WeftError::Loader {
                message: format!("cannot read '{}'", path.display()),
                source: Some(Box::new(e)),
            }),
            Self::Remote(url) => {
                let response = ureq::get(url).call().map_err(|e| WeftError::Loader {
                    message: format!("cannot fetch '{url}'"),
                    source: Some(Box::new(e)),
                })?;
                response.into_string().map_err(|e| WeftError::Loader {
                    message: format!("cannot read response body from '{url}'"),
                    source: Some(Box::new(e)),
                })
            }
        }
    }

    fn display(&self) -> String {
        match self {
            Self::Local(path) => path.display().to_string(),
            Self::Remote(url) => url.clone(),
        }
    }
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}").expect("valid pattern"))
}

/// Expand `${VAR}` / `${VAR:default}` occurrences in one scalar.
fn expand_env_string(raw: &str) -> Result<String> {
    let mut failure: Option<String> = None;
    let expanded = env_pattern().replace_all(raw, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match env::var(name) {
            Ok(value) => value,
            Err(_) => match caps.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    failure.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            },
        }
    });
    match failure {
        Some(name) => Err(WeftError::loader(format!(
            "environment variable '{name}' is required but not set"
        ))),
        None => Ok(expanded.into_owned()),
    }
}

/// Load `.env` files before expansion: the working directory first, then the
/// document's directory. Values never override variables already present in
/// the process environment, so the working directory takes precedence.
fn load_dotenv_files(base: &DocumentBase) {
    if let Ok(cwd) = env::current_dir() {
        let cwd_env = cwd.join(".env");
        if cwd_env.exists() {
            let _ = dotenvy::from_path(&cwd_env);
        }
    }
    if let DocumentBase::Local(path) = base {
        if let Some(parent) = path.parent() {
            let doc_env = parent.join(".env");
            if doc_env.exists() {
                let _ = dotenvy::from_path(&doc_env);
            }
        }
    }
}

fn expand_node(node: Value, base: &DocumentBase) -> Result<Value> {
    match node {
        Value::String(s) => Ok(Value::String(expand_env_string(&s)?)),
        Value::Sequence(items) => Ok(Value::Sequence(
            items
                .into_iter()
                .map(|item| expand_node(item, base))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (key, value) in map {
                let key = expand_node(key, base)?;
                let value = expand_node(value, base)?;
                out.insert(key, value);
            }
            Ok(Value::Mapping(out))
        }
        Value::Tagged(tagged) => expand_tagged(*tagged, base),
        other => Ok(other),
    }
}

fn expand_tagged(tagged: TaggedValue, base: &DocumentBase) -> Result<Value> {
    let tag = tagged.tag.to_string();
    match tag.as_str() {
        "!include" => {
            let target = include_target(&tagged.value, base)?;
            let resolved = base.resolve(&target);
            debug!(from = %base.display(), include = %resolved.display(), "splicing include");
            load_value(&resolved)
        }
        "!include_raw" => {
            let target = include_target(&tagged.value, base)?;
            let resolved = base.resolve(&target);
            debug!(from = %base.display(), include = %resolved.display(), "inlining raw include");
            Ok(Value::String(resolved.read()?))
        }
        _ => Err(WeftError::loader(format!(
            "unsupported YAML tag '{tag}' in '{}'",
            base.display()
        ))),
    }
}

fn include_target(value: &Value, base: &DocumentBase) -> Result<String> {
    match value {
        Value::String(s) => expand_env_string(s),
        other => Err(WeftError::loader(format!(
            "include tag in '{}' expects a path string, got {other:?}",
            base.display()
        ))),
    }
}

fn load_value(base: &DocumentBase) -> Result<Value> {
    let text = base.read()?;
    let parsed: Value = serde_yaml::from_str(&text).map_err(|e| WeftError::Loader {
        message: format!("malformed YAML in '{}'", base.display()),
        source: Some(Box::new(e)),
    })?;
    expand_node(parsed, base)
}

/// Load a YAML document from a local path or URL, with every string scalar
/// env-expanded and every include spliced. Any failure aborts the load; there
/// is no partial document.
pub fn load_raw(location: &str) -> Result<Value> {
    let base = DocumentBase::parse(location);
    load_dotenv_files(&base);
    load_value(&base)
}

/// Load and parse a document into the surface model.
pub fn load_document(location: &str) -> Result<DocumentRoot> {
    let value = load_raw(location)?;
    parse_document(value)
}

/// Parse an already-loaded YAML tree into the surface model.
pub fn parse_document(value: Value) -> Result<DocumentRoot> {
    serde_yaml::from_value(value).map_err(|e| WeftError::Loader {
        message: "document does not match any known root shape".to_string(),
        source: Some(Box::new(e)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_env_expansion_with_default() {
        env::set_var("WEFT_TEST_SET", "present");
        assert_eq!(
            expand_env_string("v=${WEFT_TEST_SET}").unwrap(),
            "v=present"
        );
        assert_eq!(
            expand_env_string("v=${WEFT_TEST_UNSET_XYZ:fallback}").unwrap(),
            "v=fallback"
        );
    }

    #[test]
    fn test_missing_required_env_var_fails() {
        let err = expand_env_string("${WEFT_DEFINITELY_MISSING_VAR}").unwrap_err();
        assert!(err.to_string().contains("WEFT_DEFINITELY_MISSING_VAR"));
    }

    #[test]
    fn test_include_splices_yaml() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "vars.yaml", "- id: q\n  type: text\n");
        let main = write_file(
            dir.path(),
            "main.yaml",
            "id: app\nvariables: !include vars.yaml\n",
        );

        let value = load_raw(main.to_str().unwrap()).unwrap();
        let vars = value.get("variables").unwrap().as_sequence().unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(
            vars[0].get("id").unwrap(),
            &Value::String("q".to_string())
        );
    }

    #[test]
    fn test_include_raw_inlines_string() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "prompt.txt", "Answer in haiku: {question}");
        let main = write_file(
            dir.path(),
            "main.yaml",
            "id: app\ndescription: !include_raw prompt.txt\n",
        );

        let value = load_raw(main.to_str().unwrap()).unwrap();
        assert_eq!(
            value.get("description").unwrap(),
            &Value::String("Answer in haiku: {question}".to_string())
        );
    }

    #[test]
    fn test_include_resolves_relative_to_including_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        write_file(dir.path(), "leaf.yaml", "id: leaf_app\n");
        write_file(&dir.path().join("sub"), "mid.yaml", "!include ../leaf.yaml");
        let main = write_file(
            dir.path(),
            "main.yaml",
            "id: app\nreferences:\n  - !include sub/mid.yaml\n",
        );

        let value = load_raw(main.to_str().unwrap()).unwrap();
        let refs = value.get("references").unwrap().as_sequence().unwrap();
        assert_eq!(
            refs[0].get("id").unwrap(),
            &Value::String("leaf_app".to_string())
        );
    }

    #[test]
    fn test_missing_include_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(dir.path(), "main.yaml", "id: app\nx: !include gone.yaml\n");
        assert!(load_raw(main.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_malformed_included_yaml_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "bad.yaml", "a: [unclosed\n");
        let main = write_file(dir.path(), "main.yaml", "x: !include bad.yaml\n");
        assert!(load_raw(main.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_remote_url_passthrough_resolution() {
        let base = DocumentBase::parse("https://example.com/specs/app.yaml");
        let DocumentBase::Remote(url) = base.resolve("shared/vars.yaml") else {
            panic!("expected remote");
        };
        assert_eq!(url, "https://example.com/specs/shared/vars.yaml");

        let DocumentBase::Remote(url) = base.resolve("/root.yaml") else {
            panic!("expected remote");
        };
        assert_eq!(url, "https://example.com/root.yaml");
    }
}
