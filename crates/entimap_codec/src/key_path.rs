//! Hierarchical key paths as they travel on the wire.
//!
//! A path lists `(kind, id-or-name)` pairs from the root ancestor down to the
//! leaf, plus an optional namespace. Only the leaf may lack an identifier.

use std::fmt;

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Identifier of one path element.
///
/// Numeric ids sort before names, matching the ordering used by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdOrName {
    /// Store-allocated or caller-chosen integer id.
    Id(i64),
    /// Caller-chosen string name.
    Name(String),
}

impl fmt::Display for IdOrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// One `(kind, id-or-name)` step of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    /// Kind of this element.
    pub kind: String,
    /// Identifier, absent on the leaf of a partial key.
    pub id: Option<IdOrName>,
}

impl PathElement {
    /// Create a complete element.
    pub fn new(kind: impl Into<String>, id: IdOrName) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id),
        }
    }

    /// Create an element without an identifier.
    pub fn partial(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }
}

/// A full key path: namespace plus root-to-leaf elements.
///
/// Paths order by namespace first and then element-wise from the root, so
/// descendants sort directly after their ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath {
    /// Namespace, `None` for the default namespace.
    pub namespace: Option<String>,
    /// Elements from root to leaf.
    pub elements: Vec<PathElement>,
}

impl KeyPath {
    /// Create a path in the given namespace.
    pub fn new(namespace: Option<String>, elements: Vec<PathElement>) -> Self {
        Self {
            namespace,
            elements,
        }
    }

    /// The leaf element, if the path is non-empty.
    pub fn leaf(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    /// Returns true if the leaf has no identifier.
    pub fn is_partial(&self) -> bool {
        self.leaf().map_or(true, |leaf| leaf.id.is_none())
    }

    /// Returns true if `self` is `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &KeyPath) -> bool {
        self.namespace == other.namespace
            && self.elements.len() <= other.elements.len()
            && other.elements.starts_with(&self.elements)
    }

    /// Flatten into the tagged array form: `[namespace, kind, id, kind, id, ...]`.
    pub fn to_value(&self) -> Value {
        let mut items = Vec::with_capacity(1 + self.elements.len() * 2);
        items.push(
            self.namespace
                .as_ref()
                .map_or(Value::Null, |ns| Value::Text(ns.clone())),
        );
        for element in &self.elements {
            items.push(Value::Text(element.kind.clone()));
            items.push(match &element.id {
                None => Value::Null,
                Some(IdOrName::Id(id)) => Value::Integer(*id),
                Some(IdOrName::Name(name)) => Value::Text(name.clone()),
            });
        }
        Value::Array(items)
    }

    /// Rebuild a path from its flattened array form.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| CodecError::malformed("key path", "expected an array"))?;
        let (namespace, pairs) = items
            .split_first()
            .ok_or_else(|| CodecError::malformed("key path", "missing namespace slot"))?;

        let namespace = match namespace {
            Value::Null => None,
            Value::Text(ns) => Some(ns.clone()),
            other => {
                return Err(CodecError::malformed(
                    "key path",
                    format!("namespace must be text or null, got {}", other.type_name()),
                ))
            }
        };

        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(CodecError::malformed(
                "key path",
                "expected one or more (kind, id) pairs",
            ));
        }

        let mut elements = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks_exact(2) {
            let kind = pair[0]
                .as_text()
                .ok_or_else(|| CodecError::malformed("key path", "kind must be text"))?;
            let id = match &pair[1] {
                Value::Null => None,
                Value::Integer(id) => Some(IdOrName::Id(*id)),
                Value::Text(name) => Some(IdOrName::Name(name.clone())),
                other => {
                    return Err(CodecError::malformed(
                        "key path",
                        format!("id must be integer, text or null, got {}", other.type_name()),
                    ))
                }
            };
            elements.push(PathElement {
                kind: kind.to_string(),
                id,
            });
        }

        let path = Self {
            namespace,
            elements,
        };
        if path.elements[..path.elements.len() - 1]
            .iter()
            .any(|element| element.id.is_none())
        {
            return Err(CodecError::malformed(
                "key path",
                "only the leaf may omit its identifier",
            ));
        }
        Ok(path)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}|")?;
        }
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match &element.id {
                Some(id) => write!(f, "{}:{id}", element.kind)?,
                None => write!(f, "{}:?", element.kind)?,
            }
        }
        Ok(())
    }
}
