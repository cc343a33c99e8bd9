//! Built-in property kinds.

use std::fmt;
use std::sync::Arc;

use crate::entity::Entity;
use crate::property::FieldValue;

/// Function computing a derived property from the rest of an entity.
#[derive(Clone)]
pub struct Derivation(Arc<dyn Fn(&Entity) -> FieldValue + Send + Sync>);

impl Derivation {
    /// Wraps a derivation function.
    pub fn new(f: impl Fn(&Entity) -> FieldValue + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn compute(&self, entity: &Entity) -> FieldValue {
        (self.0)(entity)
    }
}

impl fmt::Debug for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Derivation(..)")
    }
}

/// The value type a property holds.
#[derive(Debug, Clone)]
pub enum PropertyKind {
    /// Booleans.
    Bool,
    /// Signed integers.
    Integer,
    /// Floats.
    Float,
    /// Indexable text, stored encoded.
    String,
    /// Long text, never indexed, optionally compressed.
    Text,
    /// Raw bytes, never indexed, optionally compressed.
    Bytes,
    /// JSON documents, never indexed, optionally compressed.
    Json,
    /// Timezone-aware instants, stored in UTC.
    DateTime,
    /// Complete keys, optionally restricted to one kind.
    Key,
    /// Read-only values derived from the entity.
    Computed(Derivation),
}

impl PropertyKind {
    /// Short name, for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Json => "json",
            Self::DateTime => "datetime",
            Self::Key => "key",
            Self::Computed(_) => "computed",
        }
    }

    /// Blob kinds can never be indexed.
    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Text | Self::Bytes | Self::Json)
    }

    /// Kinds that accept `compressed`/`compression_level`.
    pub fn is_compressable(&self) -> bool {
        self.is_blob()
    }

    /// Kinds that accept an `encoding`.
    pub fn is_encodable(&self) -> bool {
        matches!(self, Self::String | Self::Text)
    }

    /// Whether `value` (a single element, never a list) has this kind's type.
    pub(crate) fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::Computed(_), _)
                | (Self::Bool, FieldValue::Bool(_))
                | (Self::Integer, FieldValue::Integer(_))
                | (Self::Float, FieldValue::Float(_))
                | (Self::String | Self::Text, FieldValue::Text(_))
                | (Self::Bytes, FieldValue::Bytes(_))
                | (Self::Json, FieldValue::Json(_))
                | (Self::DateTime, FieldValue::DateTime(_))
                | (Self::Key, FieldValue::Key(_))
        )
    }
}
