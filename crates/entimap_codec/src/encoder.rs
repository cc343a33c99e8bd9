//! Canonical CBOR writer.
//!
//! Equal values always produce equal bytes, which is what lets key paths
//! double as storage and cache keys.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Tag wrapping an integer count of microseconds since the Unix epoch.
pub const TAG_TIMESTAMP_MICROS: u64 = 40_001;

/// Tag wrapping a flattened key path array.
pub const TAG_KEY_PATH: u64 = 40_002;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;
const FLOAT64: u8 = 0xfb;

/// Encodes `value` in canonical form.
///
/// Map entries are ordered by their encoded keys, shorter first and then
/// bytewise. Integer arguments take the fewest bytes that hold them and
/// every float is written at double width.
///
/// # Errors
///
/// Fails on NaN floats and on maps with duplicate keys.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut writer = Writer::default();
    writer.write(value)?;
    Ok(writer.finish())
}

/// Appends canonical items to a growable buffer.
#[derive(Debug, Default)]
pub struct Writer {
    out: Vec<u8>,
}

impl Writer {
    /// Writer whose buffer is preallocated for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
        }
    }

    /// Appends one value.
    ///
    /// # Errors
    ///
    /// See [`to_canonical_cbor`]. On error the buffer may hold a partial item.
    pub fn write(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.out.push(NULL),
            Value::Bool(flag) => self.out.push(if *flag { TRUE } else { FALSE }),
            Value::Integer(n) => self.integer(*n),
            Value::Float(f) => {
                if f.is_nan() {
                    return Err(CodecError::NaNForbidden);
                }
                self.out.push(FLOAT64);
                self.out.extend_from_slice(&f.to_be_bytes());
            }
            Value::Bytes(raw) => self.string(MAJOR_BYTES, raw),
            Value::Text(text) => self.string(MAJOR_TEXT, text.as_bytes()),
            Value::Timestamp(micros) => {
                self.head(MAJOR_TAG, TAG_TIMESTAMP_MICROS);
                self.integer(*micros);
            }
            Value::Key(path) => {
                self.head(MAJOR_TAG, TAG_KEY_PATH);
                self.write(&path.to_value())?;
            }
            Value::Array(items) => {
                self.head(MAJOR_ARRAY, items.len() as u64);
                items.iter().try_for_each(|item| self.write(item))?;
            }
            Value::Map(entries) => self.map(entries)?,
        }
        Ok(())
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.out
    }

    /// Takes the finished buffer.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    /// Writes a head with the shortest argument encoding.
    fn head(&mut self, major: u8, argument: u64) {
        let major = major << 5;
        let wide = argument.to_be_bytes();
        let (info, width) = match argument {
            0..=23 => (argument as u8, 0),
            24..=0xff => (24, 1),
            0x100..=0xffff => (25, 2),
            0x1_0000..=0xffff_ffff => (26, 4),
            _ => (27, 8),
        };
        self.out.push(major | info);
        self.out.extend_from_slice(&wide[8 - width..]);
    }

    fn integer(&mut self, n: i64) {
        match u64::try_from(n) {
            Ok(positive) => self.head(MAJOR_UNSIGNED, positive),
            // !n == -1 - n, always non-negative here
            Err(_) => self.head(MAJOR_NEGATIVE, (!n) as u64),
        }
    }

    fn string(&mut self, major: u8, raw: &[u8]) {
        self.head(major, raw.len() as u64);
        self.out.extend_from_slice(raw);
    }

    fn map(&mut self, entries: &[(Value, Value)]) -> CodecResult<()> {
        let mut keyed = entries
            .iter()
            .map(|(key, value)| Ok((to_canonical_cbor(key)?, value)))
            .collect::<CodecResult<Vec<_>>>()?;
        keyed.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        if let Some(pair) = keyed.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(CodecError::invalid_structure(format!(
                "map key encoded as {:02x?} appears twice",
                pair[0].0
            )));
        }

        self.head(MAJOR_MAP, keyed.len() as u64);
        for (key, value) in keyed {
            self.out.extend_from_slice(&key);
            self.write(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_path::{IdOrName, KeyPath, PathElement};

    fn cbor(value: impl Into<Value>) -> Vec<u8> {
        to_canonical_cbor(&value.into()).unwrap()
    }

    #[test]
    fn heads_take_the_fewest_bytes() {
        assert_eq!(cbor(0i64), [0x00]);
        assert_eq!(cbor(23i64), [0x17]);
        assert_eq!(cbor(24i64), [0x18, 0x18]);
        assert_eq!(cbor(255i64), [0x18, 0xff]);
        assert_eq!(cbor(65_535i64), [0x19, 0xff, 0xff]);
        assert_eq!(cbor(65_536i64), [0x1a, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(cbor(1i64 << 32), [0x1b, 0, 0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(cbor(-24i64), [0x37]);
        assert_eq!(cbor(-25i64), [0x38, 0x18]);
        assert_eq!(
            cbor(i64::MIN),
            [0x3b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn scalars_and_strings() {
        assert_eq!(cbor(Value::Null), [0xf6]);
        assert_eq!(cbor(true), [0xf5]);
        assert_eq!(cbor("abc"), [0x63, b'a', b'b', b'c']);
        assert_eq!(cbor(Value::Bytes(vec![7; 24]))[..2], [0x58, 24]);
    }

    #[test]
    fn floats_are_double_width_and_never_nan() {
        assert_eq!(cbor(-2.0f64), [0xfb, 0xc0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            to_canonical_cbor(&Value::Float(f64::NAN)),
            Err(CodecError::NaNForbidden)
        );
    }

    #[test]
    fn timestamps_and_keys_are_tagged() {
        // 40001 and 40002 need a two-byte tag argument
        assert_eq!(cbor(Value::Timestamp(-1)), [0xd9, 0x9c, 0x41, 0x20]);
        let path = KeyPath::new(
            Some("ns".into()),
            vec![PathElement::new("K", IdOrName::Name("x".into()))],
        );
        assert_eq!(
            cbor(Value::Key(path)),
            [0xd9, 0x9c, 0x42, 0x83, 0x62, b'n', b's', 0x61, b'K', 0x61, b'x']
        );
    }

    #[test]
    fn map_entries_follow_key_encoding_order() {
        let value = Value::map(vec![
            (Value::from("zz"), Value::Integer(1)),
            (Value::Integer(100), Value::Integer(2)),
            (Value::from("y"), Value::Integer(3)),
        ]);
        // both two-byte keys; 0x18 0x64 wins bytewise over 0x61 'y'
        assert_eq!(
            cbor(value),
            [0xa3, 0x18, 0x64, 0x02, 0x61, b'y', 0x03, 0x62, b'z', b'z', 0x01]
        );
    }

    #[test]
    fn duplicate_map_keys_fail() {
        let value = Value::map(vec![
            (Value::from("k"), Value::Integer(1)),
            (Value::from("k"), Value::Integer(2)),
        ]);
        assert!(matches!(
            to_canonical_cbor(&value),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn writers_append() {
        let mut writer = Writer::with_capacity(4);
        writer.write(&Value::Integer(1)).unwrap();
        writer.write(&Value::Null).unwrap();
        assert_eq!(writer.bytes(), [0x01, 0xf6]);
        assert_eq!(writer.finish(), vec![0x01, 0xf6]);
    }

    #[test]
    fn ciborium_reads_the_output() {
        let value = Value::map(vec![
            (Value::from("n"), Value::Integer(-7)),
            (Value::from("f"), Value::Float(0.25)),
            (Value::from("t"), Value::from("hi")),
        ]);
        let parsed: ciborium::value::Value =
            ciborium::de::from_reader(cbor(value).as_slice()).unwrap();
        let map = parsed.as_map().unwrap();
        assert_eq!(map.len(), 3);
        assert!(map
            .iter()
            .any(|(k, v)| k.as_text() == Some("f") && v.as_float() == Some(0.25)));
    }
}
