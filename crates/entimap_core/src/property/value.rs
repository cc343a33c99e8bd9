//! Application-side property values.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use entimap_codec::Value;

use crate::error::{CoreError, CoreResult};
use crate::key::Key;

/// A typed value as seen by application code.
///
/// The property pipeline turns these into wire [`Value`]s on store and back
/// on load.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Double precision float.
    Float(f64),
    /// Unicode text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Arbitrary JSON document.
    Json(serde_json::Value),
    /// Timezone-aware instant.
    DateTime(DateTime<FixedOffset>),
    /// Reference to another entity.
    Key(Key),
    /// Values of a repeated property.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Builds a list from anything convertible.
    pub fn list<T: Into<FieldValue>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Attaches the local UTC offset to a naive date-time.
    ///
    /// Returns `None` for wall-clock times that do not exist or are ambiguous
    /// in the local zone.
    pub fn local_datetime(naive: NaiveDateTime) -> Option<Self> {
        Local
            .from_local_datetime(&naive)
            .single()
            .map(|dt| Self::DateTime(dt.fixed_offset()))
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::DateTime(_) => "datetime",
            Self::Key(_) => "key",
            Self::List(_) => "list",
        }
    }

    /// Returns true if this is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get as JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Get as date-time.
    pub fn as_datetime(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Self::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    /// Get as key.
    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Self::Key(k) => Some(k),
            _ => None,
        }
    }

    /// Get as list.
    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Converts a fully staged value to its wire form.
    pub(crate) fn into_wire(self) -> CoreResult<Value> {
        Ok(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Integer(n) => Value::Integer(n),
            Self::Float(n) => Value::Float(n),
            Self::Text(s) => Value::Text(s),
            Self::Bytes(b) => Value::Bytes(b),
            Self::DateTime(dt) => Value::Timestamp(dt.timestamp_micros()),
            Self::Key(key) => Value::Key(key.to_path()),
            Self::List(items) => Value::Array(
                items
                    .into_iter()
                    .map(Self::into_wire)
                    .collect::<CoreResult<_>>()?,
            ),
            Self::Json(_) => {
                return Err(CoreError::invalid_operation(
                    "JSON values must be serialized before reaching the wire",
                ))
            }
        })
    }

    /// Converts a wire value into the matching application value.
    pub(crate) fn from_wire(value: Value) -> CoreResult<Self> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Integer(n) => Self::Integer(n),
            Value::Float(n) => Self::Float(n),
            Value::Text(s) => Self::Text(s),
            Value::Bytes(b) => Self::Bytes(b),
            Value::Timestamp(micros) => {
                let dt = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
                    CoreError::invalid_operation(format!("timestamp {micros} is out of range"))
                })?;
                Self::DateTime(dt.fixed_offset())
            }
            Value::Key(path) => Self::Key(Key::from_path(&path)?),
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_wire)
                    .collect::<CoreResult<_>>()?,
            ),
            Value::Map(_) => {
                return Err(CoreError::invalid_operation(
                    "map values are not valid property values",
                ))
            }
        })
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<DateTime<FixedOffset>> for FieldValue {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt.fixed_offset())
    }
}

impl From<Key> for FieldValue {
    fn from(key: Key) -> Self {
        Self::Key(key)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
