//! Strict reader for the canonical CBOR subset written by
//! [`to_canonical_cbor`](crate::to_canonical_cbor).
//!
//! Anything the encoder would never produce is rejected: padded integer
//! arguments, unsorted or duplicate map keys, indefinite lengths, half and
//! single floats, NaN and unknown tags.

use std::cmp::Ordering;

use crate::encoder::{TAG_KEY_PATH, TAG_TIMESTAMP_MICROS};
use crate::error::{CodecError, CodecResult};
use crate::key_path::KeyPath;
use crate::value::Value;

/// Largest element count accepted for arrays and maps.
const MAX_ITEMS: u64 = 16 * 1024 * 1024;

/// Largest byte or text string accepted.
const MAX_STRING_LEN: u64 = 256 * 1024 * 1024;

/// Decodes exactly one value from `bytes`.
///
/// # Errors
///
/// Fails when the input is not canonical, uses a construct outside the wire
/// contract, or has bytes left over after the value.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut reader = Reader::new(bytes);
    let value = reader.read_value()?;
    match reader.rest().len() {
        0 => Ok(value),
        remaining => Err(CodecError::TrailingBytes { remaining }),
    }
}

/// Initial byte of a data item, split into its two fields.
#[derive(Clone, Copy)]
struct Head {
    major: u8,
    info: u8,
}

impl From<u8> for Head {
    fn from(byte: u8) -> Self {
        Self {
            major: byte >> 5,
            info: byte & 0x1f,
        }
    }
}

/// Cursor over a borrowed buffer of canonical CBOR.
///
/// Several values may be read back to back; [`rest`](Self::rest) exposes
/// whatever has not been consumed yet.
#[derive(Debug)]
pub struct Reader<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Starts reading at the beginning of `input`.
    #[must_use]
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, offset: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.input[self.offset.min(self.input.len())..]
    }

    /// Reads the next complete value.
    ///
    /// # Errors
    ///
    /// See [`from_cbor`].
    pub fn read_value(&mut self) -> CodecResult<Value> {
        let head = Head::from(self.take(1)?[0]);
        match head.major {
            0 => {
                let n = self.argument(head.info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            1 => {
                let n = self.argument(head.info)?;
                let n = i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?;
                Ok(Value::Integer(-1 - n))
            }
            2 => self.string(head.info).map(|raw| Value::Bytes(raw.to_vec())),
            3 => {
                let raw = self.string(head.info)?;
                let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Text(text.to_owned()))
            }
            4 => {
                let count = self.count(head.info, MAX_ITEMS)?;
                let mut items = Vec::with_capacity(count.min(self.rest().len()));
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(Value::Array(items))
            }
            5 => self.map(head.info),
            6 => self.tagged(head.info),
            _ => self.simple(head.info),
        }
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let taken = &self.input[self.offset..end];
        self.offset = end;
        Ok(taken)
    }

    fn take_uint(&mut self, width: usize) -> CodecResult<u64> {
        Ok(self
            .take(width)?
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
    }

    /// Integer argument of a head, refusing any encoding wider than needed.
    fn argument(&mut self, info: u8) -> CodecResult<u64> {
        let (width, smallest) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (1, 24),
            25 => (2, 1 << 8),
            26 => (4, 1 << 16),
            27 => (8, 1 << 32),
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional information")),
        };
        let value = self.take_uint(width)?;
        if value < smallest {
            return Err(CodecError::invalid_structure(format!(
                "argument {value} is not in its shortest form"
            )));
        }
        Ok(value)
    }

    fn count(&mut self, info: u8, limit: u64) -> CodecResult<usize> {
        let claimed = self.argument(info)?;
        if claimed > limit {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed: limit,
            });
        }
        usize::try_from(claimed).map_err(|_| CodecError::IntegerOverflow)
    }

    fn string(&mut self, info: u8) -> CodecResult<&'a [u8]> {
        let len = self.count(info, MAX_STRING_LEN)?;
        self.take(len)
    }

    fn map(&mut self, info: u8) -> CodecResult<Value> {
        let count = self.count(info, MAX_ITEMS)?;
        let mut entries = Vec::with_capacity(count.min(self.rest().len()));
        let mut last_key: Option<&'a [u8]> = None;
        for _ in 0..count {
            let start = self.offset;
            let key = self.read_value()?;
            let encoded = &self.input[start..self.offset];
            if last_key.is_some_and(|last| canonical_order(last, encoded) != Ordering::Less) {
                return Err(CodecError::invalid_structure(
                    "map keys are duplicated or out of canonical order",
                ));
            }
            last_key = Some(encoded);
            entries.push((key, self.read_value()?));
        }
        Ok(Value::Map(entries))
    }

    fn tagged(&mut self, info: u8) -> CodecResult<Value> {
        match self.argument(info)? {
            TAG_TIMESTAMP_MICROS => match self.read_value()? {
                Value::Integer(micros) => Ok(Value::Timestamp(micros)),
                other => Err(CodecError::malformed(
                    "timestamp",
                    format!("expected integer, got {}", other.type_name()),
                )),
            },
            TAG_KEY_PATH => KeyPath::from_value(&self.read_value()?).map(Value::Key),
            tag => Err(CodecError::unsupported_type(format!("tag {tag}"))),
        }
    }

    fn simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 | 21 => Ok(Value::Bool(info == 21)),
            22 => Ok(Value::Null),
            25 | 26 => Err(CodecError::NonCanonicalFloat),
            27 => {
                let float = f64::from_bits(self.take_uint(8)?);
                if float.is_nan() {
                    Err(CodecError::NaNForbidden)
                } else {
                    Ok(Value::Float(float))
                }
            }
            31 => Err(CodecError::invalid_structure("stray break marker")),
            other => Err(CodecError::unsupported_type(format!("simple value {other}"))),
        }
    }
}

/// Canonical key order: shorter encodings first, then bytewise.
fn canonical_order(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
