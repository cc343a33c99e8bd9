//! Store-ready entity envelope.
//!
//! An [`EntityRecord`] is what a binding writes for one entity: the key path,
//! the already-marshalled property values, and the set of property names that
//! must not be indexed. Its canonical encoding is the payload held by caches.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use crate::decoder::from_cbor;
use crate::encoder::to_canonical_cbor;
use crate::error::{CodecError, CodecResult};
use crate::key_path::KeyPath;
use crate::value::Value;

const FIELD_KEY: &str = "k";
const FIELD_PROPERTIES: &str = "p";
const FIELD_UNINDEXED: &str = "u";

/// A serialized entity: key, wire properties and unindexed names.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Full key path of the entity.
    pub key: KeyPath,
    /// Store-side property name to wire value.
    pub properties: BTreeMap<String, Value>,
    /// Store-side names excluded from indexes.
    pub unindexed: BTreeSet<String>,
}

impl EntityRecord {
    /// Create an empty record for `key`.
    pub fn new(key: KeyPath) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
            unindexed: BTreeSet::new(),
        }
    }

    /// Envelope as a wire map.
    pub fn to_value(&self) -> Value {
        let properties = self
            .properties
            .iter()
            .map(|(name, value)| (Value::Text(name.clone()), value.clone()))
            .collect();
        let unindexed = self
            .unindexed
            .iter()
            .map(|name| Value::Text(name.clone()))
            .collect();
        Value::map(vec![
            (Value::from(FIELD_KEY), Value::Key(self.key.clone())),
            (Value::from(FIELD_PROPERTIES), Value::Map(properties)),
            (Value::from(FIELD_UNINDEXED), Value::Array(unindexed)),
        ])
    }

    /// Rebuild a record from its wire map.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        let key = value
            .get(FIELD_KEY)
            .and_then(Value::as_key)
            .ok_or_else(|| CodecError::malformed("record", "missing key"))?
            .clone();

        let mut properties = BTreeMap::new();
        let pairs = value
            .get(FIELD_PROPERTIES)
            .and_then(Value::as_map)
            .ok_or_else(|| CodecError::malformed("record", "missing properties"))?;
        for (name, property) in pairs {
            let name = name
                .as_text()
                .ok_or_else(|| CodecError::malformed("record", "property names must be text"))?;
            properties.insert(name.to_string(), property.clone());
        }

        let mut unindexed = BTreeSet::new();
        let names = value
            .get(FIELD_UNINDEXED)
            .and_then(Value::as_array)
            .ok_or_else(|| CodecError::malformed("record", "missing unindexed names"))?;
        for name in names {
            let name = name
                .as_text()
                .ok_or_else(|| CodecError::malformed("record", "unindexed names must be text"))?;
            unindexed.insert(name.to_string());
        }

        Ok(Self {
            key,
            properties,
            unindexed,
        })
    }

    /// Canonical CBOR bytes of this record.
    pub fn encode(&self) -> CodecResult<Bytes> {
        to_canonical_cbor(&self.to_value()).map(Bytes::from)
    }

    /// Decode a record from canonical CBOR bytes.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Self::from_value(&from_cbor(bytes)?)
    }
}
