//! Model schemas.
//!
//! A [`Model`] is an immutable, ordered property catalog shared by every
//! entity of its kind. Per-entity state lives on [`Entity`], never here.

mod registry;

pub use registry::Registry;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::adapter::Record;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::property::Property;

/// An entity schema.
#[derive(Debug)]
pub struct Model {
    kind: String,
    properties: Vec<Property>,
    by_name: HashMap<String, usize>,
    by_entity_name: HashMap<String, usize>,
    partial_key: Key,
}

impl Model {
    /// Starts a schema for `kind`.
    pub fn builder(kind: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            kind: kind.into(),
            properties: Vec::new(),
        }
    }

    /// The kind entities of this model are stored under.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Properties in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Looks up a property by model-side name.
    pub fn property(&self, name: &str) -> CoreResult<&Property> {
        self.by_name
            .get(name)
            .map(|&i| &self.properties[i])
            .ok_or_else(|| CoreError::UnknownProperty {
                kind: self.kind.clone(),
                property: name.to_string(),
            })
    }

    /// Looks up a property by store-side name.
    #[must_use]
    pub fn property_by_entity_name(&self, name: &str) -> Option<&Property> {
        self.by_entity_name.get(name).map(|&i| &self.properties[i])
    }

    /// Creates an entity with a partial key and every default applied.
    #[must_use]
    pub fn new_entity(self: &Arc<Self>) -> Entity {
        let mut entity = Entity::new(Arc::clone(self), self.partial_key.clone());
        for property in &self.properties {
            if let Some(default) = property.default_value() {
                entity.put_raw(property.name_on_entity(), default.clone());
            }
        }
        entity
    }

    /// Builds an entity from a stored record through each property's load
    /// pipeline. Stored values without a matching property are ignored.
    pub fn load(self: &Arc<Self>, record: Record) -> CoreResult<Entity> {
        if record.key.kind() != self.kind {
            return Err(CoreError::invalid_key(format!(
                "cannot load a {} record as {}",
                record.key.kind(),
                self.kind
            )));
        }
        let mut entity = Entity::new(Arc::clone(self), record.key);
        for (name, value) in record.properties {
            match self.property_by_entity_name(&name) {
                Some(property) => property.prepare_to_load(&mut entity, value)?,
                None => trace!(kind = %self.kind, property = %name, "ignoring unknown stored property"),
            }
        }
        Ok(entity)
    }
}

/// Builder for [`Model`].
#[derive(Debug)]
pub struct ModelBuilder {
    kind: String,
    properties: Vec<Property>,
}

impl ModelBuilder {
    /// Appends a property.
    #[must_use]
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Freezes the catalog.
    pub fn build(self) -> CoreResult<Arc<Model>> {
        let partial_key = Key::partial(self.kind.clone())
            .map_err(|e| CoreError::invalid_definition(&self.kind, e.to_string()))?;

        let mut by_name = HashMap::with_capacity(self.properties.len());
        let mut by_entity_name = HashMap::with_capacity(self.properties.len());
        for (i, property) in self.properties.iter().enumerate() {
            if by_name.insert(property.name().to_string(), i).is_some() {
                return Err(CoreError::invalid_definition(
                    &self.kind,
                    format!("duplicate property {}", property.name()),
                ));
            }
            if by_entity_name
                .insert(property.name_on_entity().to_string(), i)
                .is_some()
            {
                return Err(CoreError::invalid_definition(
                    &self.kind,
                    format!("duplicate store-side name {}", property.name_on_entity()),
                ));
            }
        }

        Ok(Arc::new(Model {
            kind: self.kind,
            properties: self.properties,
            by_name,
            by_entity_name,
            partial_key,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::FieldValue;

    fn note() -> Arc<Model> {
        Model::builder("Note")
            .property(Property::text("body").compressed(true).build().unwrap())
            .property(Property::integer("views").default(0).build().unwrap())
            .property(Property::datetime("at").name_on_entity("ts").optional(true).build().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn rejects_duplicate_names() {
        let dup = Model::builder("X")
            .property(Property::integer("a").build().unwrap())
            .property(Property::string("a").build().unwrap())
            .build();
        assert!(matches!(dup, Err(CoreError::InvalidDefinition { .. })));

        let dup = Model::builder("X")
            .property(Property::integer("a").build().unwrap())
            .property(Property::string("b").name_on_entity("a").build().unwrap())
            .build();
        assert!(dup.is_err());

        assert!(Model::builder("").build().is_err());
    }

    #[test]
    fn new_entities_get_defaults() {
        let mut entity = note().new_entity();
        assert_eq!(entity.get("views").unwrap(), FieldValue::Integer(0));
        assert!(entity.key().is_partial());
        assert_eq!(entity.kind(), "Note");
    }

    #[test]
    fn load_runs_pipelines() {
        let model = note();
        let mut entity = model.new_entity();
        entity.set("body", "hello ".repeat(20)).unwrap();
        entity.set_key(Key::from_id("Note", 4).unwrap()).unwrap();
        let mut record = entity.to_record().unwrap();
        assert!(record.properties.contains_key("ts"));
        record
            .properties
            .insert("legacy".to_string(), entimap_codec::Value::Bool(true));

        let mut loaded = model.load(record).unwrap();
        assert_eq!(loaded.get("body").unwrap(), FieldValue::from("hello ".repeat(20)));
        assert_eq!(loaded.get("views").unwrap(), FieldValue::Integer(0));
        assert_eq!(loaded.key().int_id(), Some(4));
    }

    #[test]
    fn load_rejects_foreign_kinds() {
        let record = Record {
            key: Key::from_id("Person", 1).unwrap(),
            properties: Default::default(),
            unindexed: Default::default(),
        };
        assert!(note().load(record).is_err());
    }

    #[test]
    fn lookup_by_either_name() {
        let model = note();
        assert_eq!(model.property("at").unwrap().name_on_entity(), "ts");
        assert_eq!(model.property_by_entity_name("ts").unwrap().name(), "at");
        assert!(model.property("ts").is_err());
    }
}
