//! Transformation stages of the property pipeline.
//!
//! A property's stages are fixed when it is built. Store runs them in list
//! order; load runs the mirror image. Each stage receives the previous
//! stage's output and may end the chain with [`Staged::Skip`].

use std::io::{Read, Write};

use chrono::{SubsecRound, Utc};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::property::FieldValue;

/// Largest payload a compressed property may inflate to.
const MAX_INFLATED_SIZE: usize = 64 * 1024 * 1024;

/// Output of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Staged {
    /// Continue with this value.
    Value(FieldValue),
    /// Omit the property from the stored or loaded representation.
    Skip,
}

/// When a date-time property fills itself in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    /// Keep whatever the entity holds.
    #[default]
    Preserve,
    /// Set to now only when absent at store time.
    AutoNowAdd,
    /// Overwrite with now on every store.
    AutoNow,
}

/// Text encoding applied by string and text properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    /// UTF-8.
    #[default]
    Utf8,
    /// UTF-16, little endian, no byte order mark.
    Utf16Le,
    /// ISO-8859-1. Only code points up to U+00FF are encodable.
    Latin1,
}

impl TextEncoding {
    /// Encodes `text` to bytes.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, String> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Self::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c))
                        .map_err(|_| format!("{c:?} cannot be encoded as latin-1"))
                })
                .collect(),
        }
    }

    /// Decodes bytes produced by [`encode`](Self::encode).
    pub fn decode(self, bytes: &[u8]) -> Result<String, String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string()),
            Self::Utf16Le => {
                if bytes.len() % 2 != 0 {
                    return Err("odd number of bytes in utf-16 data".to_string());
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|e| e.to_string())
            }
            Self::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }

    /// Length of `text` once encoded, without allocating.
    pub fn encoded_len(self, text: &str) -> usize {
        match self {
            Self::Utf8 => text.len(),
            Self::Utf16Le => text.encode_utf16().count() * 2,
            Self::Latin1 => text.chars().count(),
        }
    }
}

/// One named transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Applies a [`TimestampPolicy`] and normalizes to UTC.
    Timestamp(TimestampPolicy),
    /// JSON document to compact text.
    Json,
    /// Text to bytes.
    Encode(TextEncoding),
    /// Raw deflate with a level in [-1, 9]; -1 picks the library default.
    Compress {
        /// Compression level.
        level: i32,
    },
    /// Value derived from other properties, never stored or loaded.
    Derived,
}

impl Stage {
    /// Stable name of the stage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timestamp(_) => "timestamp",
            Self::Json => "json",
            Self::Encode(_) => "encode",
            Self::Compress { .. } => "compress",
            Self::Derived => "derived",
        }
    }

    /// Whether the stage's store output must be written back to the entity.
    pub(crate) fn writes_back(&self) -> bool {
        matches!(self, Self::Timestamp(_))
    }

    /// Whether the stage produces a value when the input is absent.
    pub(crate) fn fills_absent(&self) -> bool {
        matches!(
            self,
            Self::Timestamp(TimestampPolicy::AutoNowAdd | TimestampPolicy::AutoNow)
        )
    }

    /// Store-direction transformation.
    pub(crate) fn store(&self, property: &str, value: FieldValue) -> CoreResult<Staged> {
        let fail = |message: String| CoreError::validation(property, message);
        let value = match (self, value) {
            (Self::Derived, _) => return Ok(Staged::Skip),
            (Self::Timestamp(policy), value) => {
                let value = match (policy, value) {
                    (TimestampPolicy::AutoNow, _) | (TimestampPolicy::AutoNowAdd, FieldValue::Null) => {
                        FieldValue::from(Utc::now())
                    }
                    (_, value) => value,
                };
                match value {
                    FieldValue::DateTime(dt) => {
                        FieldValue::DateTime(dt.with_timezone(&Utc).trunc_subsecs(6).fixed_offset())
                    }
                    other => other,
                }
            }
            (_, FieldValue::Null) => FieldValue::Null,
            (Self::Json, FieldValue::Json(doc)) => {
                FieldValue::Text(serde_json::to_string(&doc).map_err(|e| fail(e.to_string()))?)
            }
            (Self::Encode(encoding), FieldValue::Text(text)) => {
                FieldValue::Bytes(encoding.encode(&text).map_err(fail)?)
            }
            (Self::Compress { level }, FieldValue::Bytes(bytes)) => {
                FieldValue::Bytes(deflate(&bytes, *level).map_err(|e| fail(e.to_string()))?)
            }
            (stage, other) => {
                return Err(fail(format!(
                    "{} stage cannot store a {} value",
                    stage.name(),
                    other.type_name()
                )))
            }
        };
        Ok(Staged::Value(value))
    }

    /// Load-direction transformation.
    pub(crate) fn load(&self, property: &str, value: FieldValue) -> CoreResult<Staged> {
        let fail = |message: String| CoreError::validation(property, message);
        let value = match (self, value) {
            (Self::Derived, _) => return Ok(Staged::Skip),
            (_, FieldValue::Null) => FieldValue::Null,
            (Self::Timestamp(_), value @ FieldValue::DateTime(_)) => value,
            (Self::Json, FieldValue::Text(text)) => {
                FieldValue::Json(serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?)
            }
            (Self::Encode(encoding), FieldValue::Bytes(bytes)) => {
                FieldValue::Text(encoding.decode(&bytes).map_err(fail)?)
            }
            (Self::Compress { .. }, FieldValue::Bytes(bytes)) => {
                FieldValue::Bytes(inflate(&bytes).map_err(|e| fail(e.to_string()))?)
            }
            (stage, other) => {
                return Err(fail(format!(
                    "{} stage cannot load a {} value",
                    stage.name(),
                    other.type_name()
                )))
            }
        };
        Ok(Staged::Value(value))
    }
}

#[allow(clippy::cast_sign_loss)]
fn deflate(data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
    let compression = if level < 0 {
        flate2::Compression::default()
    } else {
        flate2::Compression::new(level as u32)
    };
    let mut encoder = DeflateEncoder::new(Vec::new(), compression);
    encoder.write_all(data)?;
    encoder.finish()
}

fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data).take(MAX_INFLATED_SIZE as u64 + 1);
    let mut inflated = Vec::new();
    decoder.read_to_end(&mut inflated)?;
    if inflated.len() > MAX_INFLATED_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("inflated payload exceeds {MAX_INFLATED_SIZE} bytes"),
        ));
    }
    Ok(inflated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use proptest::prelude::*;

    fn value(staged: Staged) -> FieldValue {
        match staged {
            Staged::Value(v) => v,
            Staged::Skip => panic!("unexpected skip"),
        }
    }

    #[test]
    fn encodings_round_trip() {
        for encoding in [TextEncoding::Utf8, TextEncoding::Utf16Le, TextEncoding::Latin1] {
            let bytes = encoding.encode("caf\u{e9}").unwrap();
            assert_eq!(bytes.len(), encoding.encoded_len("caf\u{e9}"));
            assert_eq!(encoding.decode(&bytes).unwrap(), "caf\u{e9}");
        }
        assert!(TextEncoding::Latin1.encode("\u{2603}").is_err());
        assert!(TextEncoding::Utf16Le.decode(&[0x41]).is_err());
    }

    #[test]
    fn json_is_compact() {
        let stored = value(
            Stage::Json
                .store("doc", FieldValue::Json(serde_json::json!({"a": [1, 2], "b": null})))
                .unwrap(),
        );
        assert_eq!(stored, FieldValue::Text(r#"{"a":[1,2],"b":null}"#.into()));
    }

    #[test]
    fn derived_always_skips() {
        assert_eq!(Stage::Derived.store("x", FieldValue::Integer(1)).unwrap(), Staged::Skip);
        assert_eq!(Stage::Derived.load("x", FieldValue::Null).unwrap(), Staged::Skip);
    }

    #[test]
    fn null_passes_through_value_stages() {
        for stage in [
            Stage::Json,
            Stage::Encode(TextEncoding::Utf8),
            Stage::Compress { level: 6 },
            Stage::Timestamp(TimestampPolicy::Preserve),
        ] {
            assert_eq!(value(stage.store("x", FieldValue::Null).unwrap()), FieldValue::Null);
            assert_eq!(value(stage.load("x", FieldValue::Null).unwrap()), FieldValue::Null);
        }
    }

    #[test]
    fn wrong_input_type_is_a_validation_error() {
        let err = Stage::Encode(TextEncoding::Utf8)
            .store("name", FieldValue::Integer(3))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn auto_now_add_only_fills_absent_values() {
        let fixed = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2020, 1, 1, 1, 0, 0)
            .unwrap();
        let stage = Stage::Timestamp(TimestampPolicy::AutoNowAdd);
        let kept = value(stage.store("created", FieldValue::DateTime(fixed)).unwrap());
        let kept = kept.as_datetime().unwrap();
        assert_eq!(*kept, fixed);
        assert_eq!(kept.offset().local_minus_utc(), 0);

        let filled = value(stage.store("created", FieldValue::Null).unwrap());
        assert!(filled.as_datetime().is_some());
    }

    #[test]
    fn auto_now_always_overwrites() {
        let old = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        let stage = Stage::Timestamp(TimestampPolicy::AutoNow);
        let stored = value(stage.store("updated", FieldValue::from(old)).unwrap());
        assert!(*stored.as_datetime().unwrap() > old);
    }

    #[test]
    fn timestamps_truncate_to_microseconds() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let stage = Stage::Timestamp(TimestampPolicy::Preserve);
        let stored = value(stage.store("at", FieldValue::from(precise)).unwrap());
        assert_eq!(
            stored.as_datetime().unwrap().timestamp_subsec_nanos(),
            123_456_000
        );
    }

    #[test]
    fn corrupt_compressed_data_fails_to_load() {
        let err = Stage::Compress { level: 6 }
            .load("blob", FieldValue::Bytes(vec![0xff, 0x00, 0x13]))
            .unwrap_err();
        assert!(err.is_validation());
    }

    proptest! {
        #[test]
        fn compression_is_lossless_at_every_level(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            level in -1i32..=9,
        ) {
            let stage = Stage::Compress { level };
            let stored = value(stage.store("blob", FieldValue::Bytes(data.clone())).unwrap());
            let loaded = value(stage.load("blob", stored).unwrap());
            prop_assert_eq!(loaded, FieldValue::Bytes(data));
        }
    }
}
