//! # entimap codec
//!
//! Wire values and their canonical CBOR form.
//!
//! Everything a backing-store binding or cache needs to move an entity as
//! bytes lives here:
//! - [`Value`], the scalar-or-sequence model accepted by the store
//! - [`KeyPath`], the root-to-leaf `(kind, id-or-name)` path plus namespace
//! - [`EntityRecord`], the store-ready envelope held by caches
//!
//! ## Wire rules
//!
//! - Maps are sorted by key (length-first, then bytewise)
//! - Integers and lengths use the shortest encoding
//! - Floats are always 8-byte IEEE-754, NaN is rejected
//! - Timestamps and key paths use private tags
//! - Lengths are always definite
//!
//! ## Usage
//!
//! ```
//! use entimap_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let value = Value::Timestamp(1_700_000_000_000_000);
//! let bytes = to_canonical_cbor(&value).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod key_path;
mod record;
mod value;

pub use decoder::{from_cbor, Reader};
pub use encoder::{to_canonical_cbor, Writer, TAG_KEY_PATH, TAG_TIMESTAMP_MICROS};
pub use error::{CodecError, CodecResult};
pub use key_path::{IdOrName, KeyPath, PathElement};
pub use record::EntityRecord;
pub use value::Value;

/// Types with a canonical byte form.
pub trait Encode {
    /// Canonical CBOR bytes of `self`.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Types that can be rebuilt from their canonical bytes.
pub trait Decode: Sized {
    /// Parses `bytes`, which must hold exactly one item.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

impl Encode for KeyPath {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(&Value::Key(self.clone()))
    }
}

impl Decode for KeyPath {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        match from_cbor(bytes)? {
            Value::Key(path) => Ok(path),
            other => Err(CodecError::malformed(
                "key path",
                format!("expected tagged key, got {}", other.type_name()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_path_bytes_roundtrip_through_traits() {
        let path = KeyPath::new(
            None,
            vec![
                PathElement::new("Person", IdOrName::Id(1)),
                PathElement::new("Note", IdOrName::Name("draft".into())),
            ],
        );
        let bytes = path.encode().unwrap();
        assert_eq!(KeyPath::decode(&bytes).unwrap(), path);
        assert!(KeyPath::decode(&Value::Integer(1).encode().unwrap()).is_err());
    }

    #[test]
    fn distinct_paths_have_distinct_bytes() {
        let a = KeyPath::new(None, vec![PathElement::new("A", IdOrName::Id(1))]);
        let b = KeyPath::new(Some("x".into()), vec![PathElement::new("A", IdOrName::Id(1))]);
        assert_ne!(a.encode().unwrap(), b.encode().unwrap());
    }
}
