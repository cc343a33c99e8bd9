//! Typed property descriptors and the marshalling pipeline.
//!
//! A [`Property`] is declared once, through [`PropertyBuilder`], and is
//! immutable afterwards. It owns:
//! - the value type ([`PropertyKind`]) and the optional/repeated/indexed flags
//! - an ordered list of [`Stage`]s applied on every store and load
//! - the validation rules run before storing and on assignment
//!
//! ```
//! use entimap_core::property::Property;
//!
//! let bio = Property::text("bio").compressed(true).optional(true).build().unwrap();
//! assert_eq!(bio.stage_names(), vec!["encode", "compress"]);
//! assert!(!bio.is_indexed());
//! ```

mod builder;
mod kind;
mod stage;
mod value;

pub use builder::PropertyBuilder;
pub use kind::{Derivation, PropertyKind};
pub use stage::{Stage, Staged, TextEncoding, TimestampPolicy};
pub use value::FieldValue;

use entimap_codec::Value;

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};

/// Maximum length of an indexed string, in characters and in encoded bytes.
pub const MAX_INDEXED_LENGTH: usize = 1500;

/// A typed field of a model.
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    name_on_entity: String,
    kind: PropertyKind,
    key_kind: Option<String>,
    indexed: bool,
    optional: bool,
    repeated: bool,
    default: Option<FieldValue>,
    stages: Vec<Stage>,
}

impl Property {
    /// Starts a boolean property.
    pub fn boolean(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::Bool)
    }

    /// Starts an integer property.
    pub fn integer(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::Integer)
    }

    /// Starts a float property.
    pub fn float(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::Float)
    }

    /// Starts an indexable string property.
    pub fn string(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::String)
    }

    /// Starts a long text property.
    pub fn text(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::Text)
    }

    /// Starts a bytes property.
    pub fn bytes(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::Bytes)
    }

    /// Starts a JSON property.
    pub fn json(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::Json)
    }

    /// Starts a date-time property.
    pub fn datetime(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::DateTime)
    }

    /// Starts a key property.
    pub fn key(name: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::Key)
    }

    /// Starts a computed property. Computed properties are indexed and
    /// optional unless configured otherwise.
    pub fn computed(
        name: impl Into<String>,
        f: impl Fn(&Entity) -> FieldValue + Send + Sync + 'static,
    ) -> PropertyBuilder {
        PropertyBuilder::new(name, PropertyKind::Computed(Derivation::new(f)))
    }

    /// Model-side name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store-side name.
    pub fn name_on_entity(&self) -> &str {
        &self.name_on_entity
    }

    /// Value type.
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// Kind restriction of a key property.
    pub fn key_kind(&self) -> Option<&str> {
        self.key_kind.as_deref()
    }

    /// Whether values are indexed.
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Whether the value may be absent.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether the value is a list.
    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    /// Whether the value is derived rather than stored.
    pub fn is_computed(&self) -> bool {
        matches!(self.kind, PropertyKind::Computed(_))
    }

    /// Value a fresh entity starts with, if any.
    pub fn default_value(&self) -> Option<&FieldValue> {
        self.default.as_ref()
    }

    /// Pipeline stages in store order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Names of the pipeline stages in store order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub(crate) fn derivation(&self) -> Option<&Derivation> {
        match &self.kind {
            PropertyKind::Computed(derivation) => Some(derivation),
            _ => None,
        }
    }

    fn text_encoding(&self) -> TextEncoding {
        self.stages
            .iter()
            .find_map(|stage| match stage {
                Stage::Encode(encoding) => Some(*encoding),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Checks type membership, presence and length rules.
    ///
    /// Returns the value to keep: absent optional repeated values become an
    /// empty list.
    pub fn validate(&self, value: FieldValue) -> CoreResult<FieldValue> {
        match value {
            FieldValue::Null if self.optional => Ok(if self.repeated {
                FieldValue::List(Vec::new())
            } else {
                FieldValue::Null
            }),
            FieldValue::Null => Err(CoreError::validation(&self.name, "a value is required")),
            FieldValue::List(items) if self.repeated => items
                .into_iter()
                .map(|item| self.validate_element(item))
                .collect::<CoreResult<_>>()
                .map(FieldValue::List),
            other if self.repeated && !self.is_computed() => Err(CoreError::validation(
                &self.name,
                format!("repeated property expects a list, got {}", other.type_name()),
            )),
            other => self.validate_element(other),
        }
    }

    fn validate_element(&self, value: FieldValue) -> CoreResult<FieldValue> {
        if !self.kind.accepts(&value) {
            return Err(CoreError::validation(
                &self.name,
                format!(
                    "{} property cannot hold a {} value",
                    self.kind.name(),
                    value.type_name()
                ),
            ));
        }

        match &value {
            FieldValue::Text(text) if self.indexed => {
                let encoding = self.text_encoding();
                if text.chars().count() > MAX_INDEXED_LENGTH
                    && encoding.encoded_len(text) > MAX_INDEXED_LENGTH
                {
                    return Err(CoreError::validation(
                        &self.name,
                        format!("indexed strings must be at most {MAX_INDEXED_LENGTH} characters"),
                    ));
                }
            }
            FieldValue::Key(key) if matches!(self.kind, PropertyKind::Key) => {
                if key.is_partial() {
                    return Err(CoreError::invalid_key(format!(
                        "cannot assign partial key {key} to key property {}",
                        self.name
                    )));
                }
                if let Some(kind) = &self.key_kind {
                    if key.kind() != kind {
                        return Err(CoreError::invalid_key(format!(
                            "property {} cannot be assigned keys of kind {}",
                            self.name,
                            key.kind()
                        )));
                    }
                }
            }
            _ => {}
        }
        Ok(value)
    }

    /// Validates and runs the store pipeline.
    ///
    /// Returns `None` when a stage skips the property. Stages that normalize
    /// or fill in values (timestamps) write the result back into `entity`.
    pub fn prepare_to_store(
        &self,
        entity: &mut Entity,
        value: FieldValue,
    ) -> CoreResult<Option<Value>> {
        // derived values never reach the store, whatever the entity holds
        if self.is_computed() {
            return Ok(None);
        }
        let fills_absent = self.stages.iter().any(Stage::fills_absent);
        let mut current = if fills_absent && value.is_null() {
            value
        } else {
            self.validate(value)?
        };

        for stage in &self.stages {
            match self.apply(stage, current, Stage::store)? {
                Staged::Value(next) => current = next,
                Staged::Skip => return Ok(None),
            }
            if stage.writes_back() {
                entity.put_raw(&self.name_on_entity, current.clone());
            }
        }

        current.into_wire().map(Some)
    }

    /// Runs the load pipeline in mirror order and writes the result into
    /// `entity`. A skipping stage clears any value the entity held, so derived
    /// values are recomputed on next access.
    pub fn prepare_to_load(&self, entity: &mut Entity, value: Value) -> CoreResult<()> {
        let mut current = FieldValue::from_wire(value)?;
        for stage in self.stages.iter().rev() {
            match self.apply(stage, current, Stage::load)? {
                Staged::Value(next) => current = next,
                Staged::Skip => {
                    entity.remove_raw(&self.name_on_entity);
                    return Ok(());
                }
            }
        }
        if self.repeated && current.is_null() {
            current = FieldValue::List(Vec::new());
        }
        entity.put_raw(&self.name_on_entity, current);
        Ok(())
    }

    /// Converts a query filter operand to its wire form.
    ///
    /// Operands are single elements, also for repeated properties, where a
    /// filter matches if any element matches.
    pub fn prepare_filter_value(&self, value: FieldValue) -> CoreResult<Value> {
        let mut current = if value.is_null() {
            value
        } else {
            self.validate_element(value)?
        };
        for stage in &self.stages {
            match stage.store(&self.name, current)? {
                Staged::Value(next) => current = next,
                Staged::Skip => {
                    return Err(CoreError::invalid_operation(format!(
                        "property {} is not stored and cannot be filtered on",
                        self.name
                    )))
                }
            }
        }
        current.into_wire()
    }

    fn apply(
        &self,
        stage: &Stage,
        value: FieldValue,
        step: fn(&Stage, &str, FieldValue) -> CoreResult<Staged>,
    ) -> CoreResult<Staged> {
        match value {
            FieldValue::List(items) if self.repeated => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match step(stage, &self.name, item)? {
                        Staged::Value(v) => out.push(v),
                        Staged::Skip => return Ok(Staged::Skip),
                    }
                }
                Ok(Staged::Value(FieldValue::List(out)))
            }
            other => step(stage, &self.name, other),
        }
    }
}
