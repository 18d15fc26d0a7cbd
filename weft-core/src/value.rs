//! ABOUTME: Tagged-union variable value with JSON conversion and typed coercion
//! ABOUTME: Type checks happen at field set-points (sources, construct), not on every read

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::ser::{Serialize, Serializer};
use serde_json::json;

use crate::error::{Result, WeftError};
use crate::types::domain::{ChatMessage, Embedding, RagChunk, RagDocument, SearchResult};
use crate::types::{DomainTypeKind, PrimitiveType, VarType};

/// A runtime variable value.
///
/// Values are heterogeneous; the enclosing message map owns the
/// set/unset distinction, so `Null` here means an explicit null.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Time(NaiveTime),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Custom {
        type_id: String,
        fields: BTreeMap<String, Value>,
    },
    Chat(ChatMessage),
    Embedding(Embedding),
    Document(RagDocument),
    Chunk(RagChunk),
    SearchResult(SearchResult),
}

impl Value {
    /// Human-readable tag for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
            Self::Time(_) => "time",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Custom { .. } => "custom",
            Self::Chat(_) => "ChatMessage",
            Self::Embedding(_) => "Embedding",
            Self::Document(_) => "RAGDocument",
            Self::Chunk(_) => "RAGChunk",
            Self::SearchResult(_) => "SearchResult",
        }
    }

    /// Render to JSON. Object keys come out sorted (BTreeMap iteration),
    /// which makes the rendering canonical for fingerprinting.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Text(s) => json!(s),
            Self::Int(i) => json!(i),
            Self::Float(f) => json!(f),
            Self::Bool(b) => json!(b),
            Self::Bytes(b) => json!(b),
            Self::Date(d) => json!(d.format("%Y-%m-%d").to_string()),
            Self::DateTime(dt) => json!(dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::Time(t) => json!(t.format("%H:%M:%S").to_string()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Map(fields) | Self::Custom { fields, .. } => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
            Self::Chat(m) => serde_json::to_value(m).unwrap_or(serde_json::Value::Null),
            Self::Embedding(e) => serde_json::to_value(e).unwrap_or(serde_json::Value::Null),
            Self::Document(d) => serde_json::to_value(d).unwrap_or(serde_json::Value::Null),
            Self::Chunk(c) => serde_json::to_value(c).unwrap_or(serde_json::Value::Null),
            Self::SearchResult(r) => serde_json::to_value(r).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Best-effort conversion from untyped JSON.
    ///
    /// Objects become generic maps; use [`Value::coerce`] when the target
    /// type is known.
    #[must_use]
    pub fn from_json(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert raw JSON into a value of the given type.
    ///
    /// This is where type checking happens; sources and construct steps call
    /// it once per field, reads do not.
    pub fn coerce(raw: serde_json::Value, ty: &VarType) -> Result<Self> {
        if raw.is_null() {
            return Ok(Self::Null);
        }
        match ty {
            VarType::Primitive(prim) => Self::coerce_primitive(raw, *prim),
            VarType::Domain(kind) => Self::coerce_domain(raw, *kind),
            VarType::Custom(def) => {
                let map = match raw {
                    serde_json::Value::Object(map) => map,
                    other => return Err(coercion_error(&other, &def.id)),
                };
                for key in map.keys() {
                    if !def.properties.contains_key(key) {
                        return Err(WeftError::Validation {
                            issues: vec![format!(
                                "unknown field '{key}' for custom type '{}'",
                                def.id
                            )],
                        });
                    }
                }
                let mut fields = BTreeMap::new();
                for (name, prop_ty) in &def.properties {
                    let Some(field_raw) = map.get(name) else {
                        return Err(WeftError::Validation {
                            issues: vec![format!(
                                "missing field '{name}' for custom type '{}'",
                                def.id
                            )],
                        });
                    };
                    fields.insert(name.clone(), Self::coerce(field_raw.clone(), prop_ty)?);
                }
                Ok(Self::Custom {
                    type_id: def.id.clone(),
                    fields,
                })
            }
            VarType::List(elem) => {
                let items = match raw {
                    serde_json::Value::Array(items) => items,
                    other => return Err(coercion_error(&other, &ty.render())),
                };
                let values = items
                    .into_iter()
                    .map(|item| Self::coerce(item, elem))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::List(values))
            }
        }
    }

    fn coerce_primitive(raw: serde_json::Value, prim: PrimitiveType) -> Result<Self> {
        match prim {
            PrimitiveType::Text
            | PrimitiveType::File
            | PrimitiveType::Image
            | PrimitiveType::Audio
            | PrimitiveType::Video => match raw {
                serde_json::Value::String(s) => Ok(Self::Text(s)),
                serde_json::Value::Number(n) => Ok(Self::Text(n.to_string())),
                serde_json::Value::Bool(b) => Ok(Self::Text(b.to_string())),
                other => Err(coercion_error(&other, prim.as_str())),
            },
            PrimitiveType::Int => match &raw {
                serde_json::Value::Number(n) => n
                    .as_i64()
                    .map(Self::Int)
                    .ok_or_else(|| coercion_error(&raw, "int")),
                serde_json::Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Self::Int)
                    .map_err(|_| coercion_error(&raw, "int")),
                _ => Err(coercion_error(&raw, "int")),
            },
            PrimitiveType::Float => match &raw {
                serde_json::Value::Number(n) => Ok(Self::Float(n.as_f64().unwrap_or(f64::NAN))),
                serde_json::Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Self::Float)
                    .map_err(|_| coercion_error(&raw, "float")),
                _ => Err(coercion_error(&raw, "float")),
            },
            PrimitiveType::Boolean => match &raw {
                serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
                serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(Self::Bool(true)),
                    "false" => Ok(Self::Bool(false)),
                    _ => Err(coercion_error(&raw, "boolean")),
                },
                _ => Err(coercion_error(&raw, "boolean")),
            },
            PrimitiveType::Bytes => match raw {
                serde_json::Value::String(s) => Ok(Self::Bytes(s.into_bytes())),
                serde_json::Value::Array(items) => {
                    let bytes = items
                        .iter()
                        .map(|item| {
                            item.as_u64()
                                .and_then(|n| u8::try_from(n).ok())
                                .ok_or_else(|| coercion_error(item, "bytes"))
                        })
                        .collect::<Result<Vec<u8>>>()?;
                    Ok(Self::Bytes(bytes))
                }
                other => Err(coercion_error(&other, "bytes")),
            },
            PrimitiveType::Date => {
                let s = raw.as_str().ok_or_else(|| coercion_error(&raw, "date"))?;
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(Self::Date)
                    .map_err(|_| coercion_error(&raw, "date"))
            }
            PrimitiveType::Datetime => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| coercion_error(&raw, "datetime"))?;
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| Self::DateTime(dt.with_timezone(&Utc)))
                    .map_err(|_| coercion_error(&raw, "datetime"))
            }
            PrimitiveType::Time => {
                let s = raw.as_str().ok_or_else(|| coercion_error(&raw, "time"))?;
                NaiveTime::parse_from_str(s, "%H:%M:%S")
                    .map(Self::Time)
                    .map_err(|_| coercion_error(&raw, "time"))
            }
        }
    }

    fn coerce_domain(raw: serde_json::Value, kind: DomainTypeKind) -> Result<Self> {
        let render = |e: serde_json::Error| WeftError::Validation {
            issues: vec![format!("cannot build {kind} from value: {e}")],
        };
        match kind {
            DomainTypeKind::ChatMessage => {
                serde_json::from_value(raw).map(Self::Chat).map_err(render)
            }
            DomainTypeKind::ChatContent => serde_json::from_value(raw)
                .map(|c| {
                    Self::Chat(ChatMessage {
                        role: crate::types::domain::ChatRole::User,
                        blocks: vec![c],
                    })
                })
                .map_err(render),
            DomainTypeKind::Embedding => serde_json::from_value(raw)
                .map(Self::Embedding)
                .map_err(render),
            DomainTypeKind::RagDocument => serde_json::from_value(raw)
                .map(Self::Document)
                .map_err(render),
            DomainTypeKind::RagChunk => {
                serde_json::from_value(raw).map(Self::Chunk).map_err(render)
            }
            DomainTypeKind::SearchResult => serde_json::from_value(raw)
                .map(Self::SearchResult)
                .map_err(render),
        }
    }

    /// Text content, if this value is textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render any value to a display string for template interpolation.
    #[must_use]
    pub fn render_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Chat(m) => m.text(),
            other => {
                let json = other.to_json();
                match json {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }
            }
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

fn coercion_error(raw: &serde_json::Value, target: &str) -> WeftError {
    WeftError::Validation {
        issues: vec![format!("cannot coerce {raw} to {target}")],
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_int_from_string() {
        let v = Value::coerce(json!("42"), &VarType::Primitive(PrimitiveType::Int)).unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn test_coerce_list_of_float() {
        let ty = VarType::List(Box::new(VarType::Primitive(PrimitiveType::Float)));
        let v = Value::coerce(json!([1, 2.5]), &ty).unwrap();
        assert_eq!(v, Value::List(vec![Value::Float(1.0), Value::Float(2.5)]));
    }

    #[test]
    fn test_coerce_rejects_mismatch() {
        assert!(Value::coerce(json!({"a": 1}), &VarType::Primitive(PrimitiveType::Int)).is_err());
    }

    #[test]
    fn test_null_is_preserved() {
        let v = Value::coerce(serde_json::Value::Null, &VarType::Primitive(PrimitiveType::Text))
            .unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn test_domain_coercion() {
        let raw = json!({"content": "body", "doc_id": "d1", "score": 0.5});
        let v = Value::coerce(raw, &VarType::Domain(DomainTypeKind::SearchResult)).unwrap();
        assert!(matches!(v, Value::SearchResult(_)));
    }

    #[test]
    fn test_canonical_json_sorts_map_keys() {
        let v = Value::Map(BTreeMap::from([
            ("zebra".to_string(), Value::Int(1)),
            ("alpha".to_string(), Value::Int(2)),
        ]));
        assert_eq!(v.to_json().to_string(), r#"{"alpha":2,"zebra":1}"#);
    }

    #[test]
    fn test_datetime_roundtrip() {
        let ty = VarType::Primitive(PrimitiveType::Datetime);
        let v = Value::coerce(json!("2024-06-01T12:30:00Z"), &ty).unwrap();
        let json = v.to_json();
        let again = Value::coerce(json, &ty).unwrap();
        assert_eq!(v, again);
    }
}
