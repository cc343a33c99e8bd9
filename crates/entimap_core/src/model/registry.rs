//! Kind to model lookup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::model::Model;

/// Registered models, keyed by kind.
///
/// Needed to rebuild entities from query results and lookups where only the
/// stored key's kind is known.
#[derive(Debug, Default)]
pub struct Registry {
    models: RwLock<HashMap<String, Arc<Model>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model. A kind can only be registered once.
    pub fn register(&self, model: Arc<Model>) -> CoreResult<()> {
        let mut models = self.models.write();
        if models.contains_key(model.kind()) {
            return Err(CoreError::invalid_definition(
                model.kind(),
                "a model is already registered for this kind",
            ));
        }
        models.insert(model.kind().to_string(), model);
        Ok(())
    }

    /// Finds the model for `kind`.
    pub fn lookup(&self, kind: &str) -> CoreResult<Arc<Model>> {
        self.models
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| CoreError::UnknownKind {
                kind: kind.to_string(),
            })
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.models.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
