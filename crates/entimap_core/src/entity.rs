//! Live entity instances.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::adapter::Record;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::model::Model;
use crate::property::FieldValue;

/// An instance of a [`Model`].
///
/// Holds exactly one [`Key`] and a value map keyed by store-side property
/// names. Reads and writes go through the model's property catalog.
#[derive(Debug, Clone)]
pub struct Entity {
    model: Arc<Model>,
    key: Key,
    data: BTreeMap<String, FieldValue>,
}

impl Entity {
    pub(crate) fn new(model: Arc<Model>, key: Key) -> Self {
        Self {
            model,
            key,
            data: BTreeMap::new(),
        }
    }

    /// The entity's model.
    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// The model kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.model.kind()
    }

    /// The entity's key, partial until the entity is first stored.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Replaces the key. The key must be of the model's kind.
    pub fn set_key(&mut self, key: Key) -> CoreResult<()> {
        if key.kind() != self.model.kind() {
            return Err(CoreError::invalid_key(format!(
                "key of kind {} cannot identify a {} entity",
                key.kind(),
                self.model.kind()
            )));
        }
        self.key = key;
        Ok(())
    }

    /// Reads a property value.
    ///
    /// Computed values are derived on first access and memoized until
    /// [`invalidate`](Self::invalidate) or the next load.
    pub fn get(&mut self, name: &str) -> CoreResult<FieldValue> {
        let model = Arc::clone(&self.model);
        let property = model.property(name)?;
        if let Some(value) = self.data.get(property.name_on_entity()) {
            return Ok(value.clone());
        }
        if let Some(derivation) = property.derivation() {
            let value = derivation.compute(self);
            self.data
                .insert(property.name_on_entity().to_string(), value.clone());
            return Ok(value);
        }
        Ok(if property.is_repeated() {
            FieldValue::List(Vec::new())
        } else {
            FieldValue::Null
        })
    }

    /// Reads the value currently held for a property, without deriving.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        let property = self.model.property(name).ok()?;
        self.data.get(property.name_on_entity())
    }

    /// Assigns a property value after validating it.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let property = model.property(name)?;
        if property.is_computed() {
            return Err(CoreError::ReadOnly {
                property: name.to_string(),
            });
        }
        let value = property.validate(value.into())?;
        self.data.insert(property.name_on_entity().to_string(), value);
        Ok(())
    }

    /// Drops the value held for a property. For computed properties this
    /// forces the next [`get`](Self::get) to re-derive.
    pub fn invalidate(&mut self, name: &str) -> CoreResult<()> {
        let model = Arc::clone(&self.model);
        let property = model.property(name)?;
        self.data.remove(property.name_on_entity());
        Ok(())
    }

    /// Values held, keyed by store-side name.
    #[must_use]
    pub fn data(&self) -> &BTreeMap<String, FieldValue> {
        &self.data
    }

    /// Runs every property's store pipeline and builds the wire record.
    ///
    /// Takes `&mut self` because timestamp stages write their normalized
    /// value back. The write-backs land only when every property succeeds;
    /// on error the entity is left as it was.
    pub fn to_record(&mut self) -> CoreResult<Record> {
        let mut staged = self.clone();
        let record = staged.build_record()?;
        self.data = staged.data;
        Ok(record)
    }

    fn build_record(&mut self) -> CoreResult<Record> {
        let model = Arc::clone(&self.model);
        let mut properties = BTreeMap::new();
        let mut unindexed = BTreeSet::new();
        for property in model.properties() {
            let name = property.name_on_entity();
            let value = self.data.get(name).cloned().unwrap_or(FieldValue::Null);
            if let Some(wire) = property.prepare_to_store(self, value)? {
                properties.insert(name.to_string(), wire);
                if !property.is_indexed() {
                    unindexed.insert(name.to_string());
                }
            }
        }
        Ok(Record {
            key: self.key.clone(),
            properties,
            unindexed,
        })
    }

    pub(crate) fn put_raw(&mut self, name_on_entity: &str, value: FieldValue) {
        self.data.insert(name_on_entity.to_string(), value);
    }

    pub(crate) fn remove_raw(&mut self, name_on_entity: &str) {
        self.data.remove(name_on_entity);
    }
}

impl From<&Entity> for FieldValue {
    fn from(entity: &Entity) -> Self {
        Self::Key(entity.key.clone())
    }
}
