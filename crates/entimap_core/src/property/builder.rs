//! Property definition builder.

use crate::error::{CoreError, CoreResult};
use crate::property::{FieldValue, Property, PropertyKind, Stage, TextEncoding, TimestampPolicy};

/// Builder for [`Property`].
///
/// Obtained from the kind constructors on [`Property`]. All options are
/// checked together in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PropertyBuilder {
    name: String,
    kind: PropertyKind,
    name_on_entity: Option<String>,
    indexed: Option<bool>,
    optional: Option<bool>,
    repeated: bool,
    default: Option<FieldValue>,
    compressed: bool,
    compression_level: Option<i32>,
    encoding: Option<TextEncoding>,
    auto_now_add: bool,
    auto_now: bool,
    key_kind: Option<String>,
}

impl PropertyBuilder {
    pub(crate) fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            name_on_entity: None,
            indexed: None,
            optional: None,
            repeated: false,
            default: None,
            compressed: false,
            compression_level: None,
            encoding: None,
            auto_now_add: false,
            auto_now: false,
            key_kind: None,
        }
    }

    /// Sets the store-side name. Defaults to the model-side name.
    #[must_use]
    pub fn name_on_entity(mut self, name: impl Into<String>) -> Self {
        self.name_on_entity = Some(name.into());
        self
    }

    /// Sets whether values are indexed.
    #[must_use]
    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = Some(indexed);
        self
    }

    /// Sets whether the value may be absent.
    #[must_use]
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    /// Sets whether the property holds a list of values.
    #[must_use]
    pub fn repeated(mut self, repeated: bool) -> Self {
        self.repeated = repeated;
        self
    }

    /// Sets the value new entities start with.
    #[must_use]
    pub fn default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Enables raw deflate compression.
    #[must_use]
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Sets the compression level, in [-1, 9]. Implies compression.
    #[must_use]
    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Sets the text encoding.
    #[must_use]
    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Fills in the current time when the value is absent at store time.
    #[must_use]
    pub fn auto_now_add(mut self, enabled: bool) -> Self {
        self.auto_now_add = enabled;
        self
    }

    /// Overwrites the value with the current time on every store.
    #[must_use]
    pub fn auto_now(mut self, enabled: bool) -> Self {
        self.auto_now = enabled;
        self
    }

    /// Restricts a key property to keys of one kind.
    #[must_use]
    pub fn key_kind(mut self, kind: impl Into<String>) -> Self {
        self.key_kind = Some(kind.into());
        self
    }

    /// Validates the options and produces the property.
    pub fn build(self) -> CoreResult<Property> {
        let fail = |message: &str| CoreError::invalid_definition(&self.name, message);

        if self.name.is_empty() {
            return Err(fail("property name must not be empty"));
        }
        if matches!(self.name_on_entity.as_deref(), Some("")) {
            return Err(fail("store-side name must not be empty"));
        }

        let computed = matches!(self.kind, PropertyKind::Computed(_));
        let indexed = self.indexed.unwrap_or(computed);
        let optional = self.optional.unwrap_or(computed);
        if indexed && self.kind.is_blob() {
            return Err(fail("blob properties cannot be indexed"));
        }

        let compressed = self.compressed || self.compression_level.is_some();
        if compressed && !self.kind.is_compressable() {
            return Err(fail("only text, bytes and json properties can be compressed"));
        }
        let level = self.compression_level.unwrap_or(-1);
        if !(-1..=9).contains(&level) {
            return Err(fail("compression level must be between -1 and 9"));
        }

        if self.encoding.is_some() && !self.kind.is_encodable() {
            return Err(fail("only string and text properties have an encoding"));
        }

        let policy = match (self.auto_now_add, self.auto_now) {
            (true, true) => return Err(fail("auto_now and auto_now_add are mutually exclusive")),
            (true, false) => TimestampPolicy::AutoNowAdd,
            (false, true) => TimestampPolicy::AutoNow,
            (false, false) => TimestampPolicy::Preserve,
        };
        if policy != TimestampPolicy::Preserve {
            if !matches!(self.kind, PropertyKind::DateTime) {
                return Err(fail("auto timestamps only apply to datetime properties"));
            }
            if self.repeated {
                return Err(fail("auto timestamps cannot be repeated"));
            }
        }

        if self.key_kind.is_some() && !matches!(self.kind, PropertyKind::Key) {
            return Err(fail("only key properties can restrict the key kind"));
        }

        let encoding = self.encoding.unwrap_or_default();
        let compress = compressed.then_some(Stage::Compress { level });
        let stages: Vec<Stage> = match &self.kind {
            PropertyKind::String => vec![Stage::Encode(encoding)],
            PropertyKind::Text => std::iter::once(Stage::Encode(encoding)).chain(compress).collect(),
            PropertyKind::Bytes => compress.into_iter().collect(),
            PropertyKind::Json => match compress {
                Some(compress) => vec![Stage::Json, Stage::Encode(TextEncoding::Utf8), compress],
                None => vec![Stage::Json],
            },
            PropertyKind::DateTime => vec![Stage::Timestamp(policy)],
            PropertyKind::Computed(_) => vec![Stage::Derived],
            PropertyKind::Bool | PropertyKind::Integer | PropertyKind::Float | PropertyKind::Key => {
                Vec::new()
            }
        };

        let property = Property {
            name_on_entity: self.name_on_entity.clone().unwrap_or_else(|| self.name.clone()),
            name: self.name.clone(),
            kind: self.kind.clone(),
            key_kind: self.key_kind.clone(),
            indexed,
            optional,
            repeated: self.repeated,
            default: None,
            stages,
        };

        match self.default {
            Some(_) if computed => Err(fail("computed properties cannot have a default")),
            Some(default) => {
                let default = property
                    .validate(default)
                    .map_err(|e| CoreError::invalid_definition(&property.name, e.to_string()))?;
                Ok(Property {
                    default: Some(default),
                    ..property
                })
            }
            None => Ok(property),
        }
    }
}
