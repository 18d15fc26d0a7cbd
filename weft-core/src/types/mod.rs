//! ABOUTME: Primitive type enum, the surface type grammar, and resolved variable types
//! ABOUTME: Parses `list[T]` / `?` type strings and resolves them against custom and domain types

pub mod domain;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// The primitive data types a variable can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Audio,
    Boolean,
    Bytes,
    Date,
    Datetime,
    Float,
    File,
    Image,
    Int,
    Text,
    Time,
    Video,
}

impl PrimitiveType {
    /// Parse a primitive token; `None` when the token names something else.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "audio" => Some(Self::Audio),
            "boolean" => Some(Self::Boolean),
            "bytes" => Some(Self::Bytes),
            "date" => Some(Self::Date),
            "datetime" => Some(Self::Datetime),
            "float" => Some(Self::Float),
            "file" => Some(Self::File),
            "image" => Some(Self::Image),
            "int" => Some(Self::Int),
            "text" => Some(Self::Text),
            "time" => Some(Self::Time),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Boolean => "boolean",
            Self::Bytes => "bytes",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Float => "float",
            Self::File => "file",
            Self::Image => "image",
            Self::Int => "int",
            Self::Text => "text",
            Self::Time => "time",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The built-in domain object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainTypeKind {
    ChatMessage,
    ChatContent,
    Embedding,
    RagDocument,
    RagChunk,
    SearchResult,
}

impl DomainTypeKind {
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "ChatMessage" => Some(Self::ChatMessage),
            "ChatContent" => Some(Self::ChatContent),
            "Embedding" => Some(Self::Embedding),
            "RAGDocument" => Some(Self::RagDocument),
            "RAGChunk" => Some(Self::RagChunk),
            "SearchResult" => Some(Self::SearchResult),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatMessage => "ChatMessage",
            Self::ChatContent => "ChatContent",
            Self::Embedding => "Embedding",
            Self::RagDocument => "RAGDocument",
            Self::RagChunk => "RAGChunk",
            Self::SearchResult => "SearchResult",
        }
    }
}

impl fmt::Display for DomainTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed (but not yet resolved) type expression from the surface grammar:
///
/// ```text
/// type := prim | custom_id | domain_id | 'list[' type ']'
/// ```
///
/// A trailing `?` is not part of the expression; it marks the enclosing
/// variable optional and is handled by [`parse_type_string`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Named(String),
    List(Box<TypeExpr>),
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::List(elem) => write!(f, "list[{elem}]"),
        }
    }
}

/// Parse a raw type string into its expression and optionality flag.
///
/// Returns the parsed expression and whether the variable is optional
/// (`?` suffix present). The suffix is stripped before grammar parsing and
/// must be re-appended on serialization.
pub fn parse_type_string(raw: &str) -> Result<(TypeExpr, bool)> {
    let trimmed = raw.trim();
    let (body, optional) = match trimmed.strip_suffix('?') {
        Some(rest) => (rest.trim_end(), true),
        None => (trimmed, false),
    };
    if body.is_empty() {
        return Err(WeftError::Resolution {
            issues: vec![format!("empty type string: '{raw}'")],
        });
    }
    Ok((parse_type_expr(body)?, optional))
}

fn parse_type_expr(body: &str) -> Result<TypeExpr> {
    if let Some(inner) = body.strip_prefix("list[").and_then(|s| s.strip_suffix(']')) {
        let elem = parse_type_expr(inner.trim())?;
        if matches!(elem, TypeExpr::List(_)) {
            return Err(WeftError::Resolution {
                issues: vec![format!(
                    "nested lists are not allowed in the surface grammar: 'list[{inner}]'"
                )],
            });
        }
        return Ok(TypeExpr::List(Box::new(elem)));
    }
    if body.contains(['[', ']', ' ']) {
        return Err(WeftError::Resolution {
            issues: vec![format!("malformed type expression: '{body}'")],
        });
    }
    Ok(TypeExpr::Named(body.to_string()))
}

/// A user-declared nominal object type with resolved property types.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomTypeDef {
    pub id: String,
    pub description: Option<String>,
    pub properties: BTreeMap<String, VarType>,
}

/// A fully resolved variable type.
#[derive(Debug, Clone, PartialEq)]
pub enum VarType {
    Primitive(PrimitiveType),
    Domain(DomainTypeKind),
    Custom(Arc<CustomTypeDef>),
    List(Box<VarType>),
}

impl VarType {
    /// Render back to the surface grammar (without the `?` suffix).
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Primitive(p) => p.as_str().to_string(),
            Self::Domain(d) => d.as_str().to_string(),
            Self::Custom(c) => c.id.clone(),
            Self::List(elem) => format!("list[{}]", elem.render()),
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Registry of declared custom types used during type resolution.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    customs: BTreeMap<String, Arc<CustomTypeDef>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from raw custom type declarations.
    ///
    /// Properties may reference other declared custom types; declaration
    /// order does not matter. Mutually recursive declarations fail.
    pub fn from_declarations(
        declarations: &[(String, Option<String>, BTreeMap<String, String>)],
    ) -> Result<Self> {
        let mut registry = Self::new();
        let raw: BTreeMap<&str, &(String, Option<String>, BTreeMap<String, String>)> =
            declarations.iter().map(|d| (d.0.as_str(), d)).collect();

        for decl in declarations {
            let mut in_progress = Vec::new();
            registry.resolve_declaration(&decl.0, &raw, &mut in_progress)?;
        }
        Ok(registry)
    }

    fn resolve_declaration(
        &mut self,
        id: &str,
        raw: &BTreeMap<&str, &(String, Option<String>, BTreeMap<String, String>)>,
        in_progress: &mut Vec<String>,
    ) -> Result<Arc<CustomTypeDef>> {
        if let Some(existing) = self.customs.get(id) {
            return Ok(existing.clone());
        }
        if in_progress.iter().any(|p| p == id) {
            return Err(WeftError::Resolution {
                issues: vec![format!(
                    "recursive custom type definition: {} -> {id}",
                    in_progress.join(" -> ")
                )],
            });
        }
        let Some(declaration) = raw.get(id).copied() else {
            return Err(WeftError::Resolution {
                issues: vec![format!("unresolved type: '{id}'")],
            });
        };
        let (_, description, properties) = declaration;

        in_progress.push(id.to_string());
        let mut resolved = BTreeMap::new();
        for (name, type_string) in properties {
            let (expr, _optional) = parse_type_string(type_string)?;
            let ty = self.resolve_with_pending(&expr, raw, in_progress)?;
            resolved.insert(name.clone(), ty);
        }
        in_progress.pop();

        let def = Arc::new(CustomTypeDef {
            id: id.to_string(),
            description: description.clone(),
            properties: resolved,
        });
        self.customs.insert(id.to_string(), def.clone());
        Ok(def)
    }

    fn resolve_with_pending(
        &mut self,
        expr: &TypeExpr,
        raw: &BTreeMap<&str, &(String, Option<String>, BTreeMap<String, String>)>,
        in_progress: &mut Vec<String>,
    ) -> Result<VarType> {
        match expr {
            TypeExpr::Named(token) => {
                if let Some(prim) = PrimitiveType::parse(token) {
                    return Ok(VarType::Primitive(prim));
                }
                if raw.contains_key(token.as_str()) || self.customs.contains_key(token) {
                    let def = self.resolve_declaration(token, raw, in_progress)?;
                    return Ok(VarType::Custom(def));
                }
                if let Some(domain) = DomainTypeKind::parse(token) {
                    return Ok(VarType::Domain(domain));
                }
                Err(WeftError::Resolution {
                    issues: vec![format!("unresolved type: '{token}'")],
                })
            }
            TypeExpr::List(elem) => {
                let inner = self.resolve_with_pending(elem, raw, in_progress)?;
                Ok(VarType::List(Box::new(inner)))
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<CustomTypeDef>> {
        self.customs.get(id).cloned()
    }

    /// Resolve a parsed type expression.
    ///
    /// Resolution order: primitives, then declared custom types, then the
    /// built-in domain types. Anything else fails naming the exact token.
    pub fn resolve(&self, expr: &TypeExpr) -> Result<VarType> {
        match expr {
            TypeExpr::Named(token) => {
                if let Some(prim) = PrimitiveType::parse(token) {
                    return Ok(VarType::Primitive(prim));
                }
                if let Some(custom) = self.customs.get(token) {
                    return Ok(VarType::Custom(custom.clone()));
                }
                if let Some(domain) = DomainTypeKind::parse(token) {
                    return Ok(VarType::Domain(domain));
                }
                Err(WeftError::Resolution {
                    issues: vec![format!("unresolved type: '{token}'")],
                })
            }
            TypeExpr::List(elem) => {
                let inner = self.resolve(elem)?;
                Ok(VarType::List(Box::new(inner)))
            }
        }
    }

    /// Parse and resolve a raw type string in one call.
    pub fn resolve_string(&self, raw: &str) -> Result<(VarType, bool)> {
        let (expr, optional) = parse_type_string(raw)?;
        Ok((self.resolve(&expr)?, optional))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitive() {
        let (expr, optional) = parse_type_string("text").unwrap();
        assert_eq!(expr, TypeExpr::Named("text".into()));
        assert!(!optional);
    }

    #[test]
    fn test_optional_suffix_is_stripped() {
        let (expr, optional) = parse_type_string("int?").unwrap();
        assert_eq!(expr, TypeExpr::Named("int".into()));
        assert!(optional);
    }

    #[test]
    fn test_list_type_parses() {
        let (expr, _) = parse_type_string("list[float]").unwrap();
        assert_eq!(expr, TypeExpr::List(Box::new(TypeExpr::Named("float".into()))));
        assert_eq!(expr.to_string(), "list[float]");
    }

    #[test]
    fn test_nested_list_rejected() {
        assert!(parse_type_string("list[list[text]]").is_err());
    }

    #[test]
    fn test_resolution_order_and_failure() {
        let registry = TypeRegistry::new();
        let (ty, _) = registry.resolve_string("text").unwrap();
        assert_eq!(ty, VarType::Primitive(PrimitiveType::Text));

        let (ty, _) = registry.resolve_string("ChatMessage").unwrap();
        assert_eq!(ty, VarType::Domain(DomainTypeKind::ChatMessage));

        let err = registry.resolve_string("NoSuchType").unwrap_err();
        assert!(err.to_string().contains("NoSuchType"));
    }

    #[test]
    fn test_custom_type_registry() {
        let declarations = vec![
            (
                "Person".to_string(),
                None,
                BTreeMap::from([
                    ("name".to_string(), "text".to_string()),
                    ("address".to_string(), "Address".to_string()),
                ]),
            ),
            (
                "Address".to_string(),
                Some("A mailing address".to_string()),
                BTreeMap::from([("street".to_string(), "text".to_string())]),
            ),
        ];
        let registry = TypeRegistry::from_declarations(&declarations).unwrap();
        let (ty, _) = registry.resolve_string("Person").unwrap();
        let VarType::Custom(person) = ty else {
            panic!("expected custom type");
        };
        assert!(matches!(person.properties["address"], VarType::Custom(_)));
    }

    #[test]
    fn test_recursive_custom_type_fails() {
        let declarations = vec![
            (
                "A".to_string(),
                None,
                BTreeMap::from([("b".to_string(), "B".to_string())]),
            ),
            (
                "B".to_string(),
                None,
                BTreeMap::from([("a".to_string(), "A".to_string())]),
            ),
        ];
        assert!(TypeRegistry::from_declarations(&declarations).is_err());
    }

    #[test]
    fn test_list_of_custom_type() {
        let declarations = vec![(
            "Row".to_string(),
            None,
            BTreeMap::from([("cell".to_string(), "text".to_string())]),
        )];
        let registry = TypeRegistry::from_declarations(&declarations).unwrap();
        let (ty, optional) = registry.resolve_string("list[Row]?").unwrap();
        assert!(optional);
        assert_eq!(ty.render(), "list[Row]");
    }
}
