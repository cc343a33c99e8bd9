//! Explicit context and per-caller sessions.
//!
//! A [`Context`] bundles the shared adapter, model registry and
//! configuration. It is cheap to clone and safe to share between threads.
//! A [`Session`] is handed out per caller; it carries the caller's namespace
//! overrides and open transaction, and is confined to one thread or task.
//!
//! Namespaces resolve as: explicit argument, then the innermost session
//! override, then [`Config::default_namespace`].
//!
//! ```
//! use std::sync::Arc;
//! use entimap_core::{Config, Context, FieldValue, InMemoryAdapter, Model, Property};
//!
//! let ctx = Context::new(InMemoryAdapter::new(), Config::default()).unwrap();
//! let person = Model::builder("Person")
//!     .property(Property::string("name").indexed(true).build().unwrap())
//!     .build()
//!     .unwrap();
//! ctx.register(Arc::clone(&person)).unwrap();
//!
//! let mut session = ctx.session();
//! let mut ada = session.new_entity(&person).unwrap();
//! ada.set("name", "Ada").unwrap();
//! let key = session.put(&mut ada).unwrap();
//!
//! let mut loaded = session.get(&key).unwrap().unwrap();
//! assert_eq!(loaded.get("name").unwrap(), FieldValue::from("Ada"));
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::debug;

use crate::adapter::{Adapter, Lookup, Record};
use crate::config::Config;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::key::{Key, KeyBuilder};
use crate::model::{Model, Registry};
use crate::query::{Query, Resultset};
use crate::transaction::{Transaction, TransactionManager};
use crate::types::Cursor;

/// Shared adapter, registry and configuration.
#[derive(Clone)]
pub struct Context {
    adapter: Arc<dyn Adapter>,
    registry: Arc<Registry>,
    config: Arc<Config>,
}

impl Context {
    /// Creates a context over `adapter` with an empty registry.
    pub fn new(adapter: impl Adapter + 'static, config: Config) -> CoreResult<Self> {
        Self::with_registry(adapter, Arc::new(Registry::new()), config)
    }

    /// Creates a context sharing an existing registry.
    pub fn with_registry(
        adapter: impl Adapter + 'static,
        registry: Arc<Registry>,
        config: Config,
    ) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            adapter: Arc::new(adapter),
            registry,
            config: Arc::new(config),
        })
    }

    /// Registers a model so entities of its kind can be loaded.
    pub fn register(&self, model: Arc<Model>) -> CoreResult<()> {
        self.registry.register(model)
    }

    /// The model registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The adapter.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens a session.
    #[must_use]
    pub fn session(&self) -> Session {
        Session {
            context: self.clone(),
            namespaces: Vec::new(),
            txn: None,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// One caller's view of a [`Context`].
#[derive(Debug)]
pub struct Session {
    context: Context,
    namespaces: Vec<Option<String>>,
    txn: Option<Transaction>,
}

impl Session {
    /// The context this session was opened from.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Effective namespace: innermost override, else the configured default.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        match self.namespaces.last() {
            Some(namespace) => namespace.as_deref(),
            None => self.context.config.default_namespace.as_deref(),
        }
    }

    /// Overrides the namespace until the returned guard is dropped. An empty
    /// name selects the default namespace.
    pub fn push_namespace(&mut self, namespace: impl Into<String>) -> NamespaceGuard<'_> {
        let namespace = namespace.into();
        self.namespaces
            .push((!namespace.is_empty()).then_some(namespace));
        NamespaceGuard { session: self }
    }

    /// Runs `f` with the namespace overridden.
    pub fn with_namespace<T>(
        &mut self,
        namespace: impl Into<String>,
        f: impl FnOnce(&mut Session) -> T,
    ) -> T {
        let mut guard = self.push_namespace(namespace);
        f(&mut guard)
    }

    /// Starts a key of `kind` in the effective namespace.
    pub fn key(&self, kind: impl Into<String>) -> KeyBuilder {
        Key::builder(kind).default_namespace(self.namespace().map(str::to_string))
    }

    /// Creates an entity of `model` with a partial key in the effective
    /// namespace and defaults applied.
    pub fn new_entity(&self, model: &Arc<Model>) -> CoreResult<Entity> {
        let mut entity = model.new_entity();
        entity.set_key(self.key(model.kind()).build()?)?;
        Ok(entity)
    }

    /// Loads one entity. Absent entities are `None`.
    pub fn get(&mut self, key: &Key) -> CoreResult<Option<Entity>> {
        let mut found = self.get_multi(std::slice::from_ref(key))?;
        Ok(found.pop().flatten())
    }

    /// Loads many entities, aligned with `keys`.
    pub fn get_multi(&mut self, keys: &[Key]) -> CoreResult<Vec<Option<Entity>>> {
        let adapter = Arc::clone(&self.context.adapter);
        let lookups = match self.txn.as_mut() {
            Some(txn) => adapter.get_in_transaction(txn, keys)?,
            None => adapter.get_multi(keys)?,
        };
        lookups
            .into_iter()
            .map(|lookup| match lookup {
                Lookup::Found(record) => self.load(record).map(Some),
                Lookup::Missing(_) => Ok(None),
            })
            .collect()
    }

    /// Stores one entity and assigns its key. Returns the stored key.
    pub fn put(&mut self, entity: &mut Entity) -> CoreResult<Key> {
        let mut keys = self.put_multi(std::slice::from_mut(entity))?;
        keys.pop()
            .ok_or_else(|| CoreError::adapter("adapter returned no key for a put"))
    }

    /// Stores many entities. Every entity is validated before anything is
    /// sent to the adapter. Inside a transaction the writes are staged.
    ///
    /// Entities are updated (keys assigned, timestamps written back) only
    /// after the adapter accepted the batch or the transaction staged it.
    ///
    /// Inside a transaction, partial keys are completed through
    /// [`Adapter::allocate_ids`] when the write is staged, not when it
    /// commits. If the transaction then aborts, or runs out of retries, an
    /// entity created outside the unit keeps that allocated key although
    /// nothing was stored under it. Create entities inside the unit when a
    /// failed run must leave them untouched.
    pub fn put_multi(&mut self, entities: &mut [Entity]) -> CoreResult<Vec<Key>> {
        let mut staged = entities.to_vec();
        let mut records = staged
            .iter_mut()
            .map(Entity::to_record)
            .collect::<CoreResult<Vec<Record>>>()?;
        let adapter = Arc::clone(&self.context.adapter);

        let keys = match self.txn.as_mut() {
            Some(txn) => {
                complete_keys(adapter.as_ref(), &mut records)?;
                let keys: Vec<Key> = records.iter().map(|r| r.key.clone()).collect();
                for record in records {
                    txn.put(record)?;
                }
                keys
            }
            None => adapter.put_multi(records)?,
        };

        if keys.len() != entities.len() {
            return Err(CoreError::adapter(format!(
                "adapter returned {} keys for {} entities",
                keys.len(),
                entities.len()
            )));
        }
        for ((entity, mut stored), key) in entities.iter_mut().zip(staged).zip(&keys) {
            stored.set_key(key.clone())?;
            *entity = stored;
        }
        Ok(keys)
    }

    /// Deletes one entity.
    pub fn delete(&mut self, key: &Key) -> CoreResult<()> {
        self.delete_multi(std::slice::from_ref(key))
    }

    /// Deletes many entities. Inside a transaction the deletes are staged.
    pub fn delete_multi(&mut self, keys: &[Key]) -> CoreResult<()> {
        match self.txn.as_mut() {
            Some(txn) => keys.iter().try_for_each(|key| txn.delete(key.clone())),
            None => self.context.adapter.delete_multi(keys),
        }
    }

    /// Runs `query` in the effective namespace.
    #[must_use]
    pub fn query(&self, query: Query) -> Resultset {
        self.resultset(query, None)
    }

    /// Resumes `query` after `cursor`.
    #[must_use]
    pub fn query_from(&self, query: Query, cursor: Cursor) -> Resultset {
        self.resultset(query, Some(cursor))
    }

    /// Counts the matches of `query`.
    pub fn count(&self, query: Query) -> CoreResult<usize> {
        self.query(query.keys_only())
            .keys()
            .try_fold(0, |n, key| key.map(|_| n + 1))
    }

    /// The first match of `query`, if any.
    pub fn first(&self, query: Query) -> CoreResult<Option<Entity>> {
        self.query(query.limit(1)).next().transpose()
    }

    /// Deletes every match of `query`. Returns the number deleted.
    pub fn delete_matching(&mut self, query: Query) -> CoreResult<usize> {
        let keys = self
            .query(query.keys_only())
            .keys()
            .collect::<CoreResult<Vec<Key>>>()?;
        for chunk in keys.chunks(self.context.config.query_batch_size) {
            self.delete_multi(chunk)?;
        }
        debug!(deleted = keys.len(), "deleted matching entities");
        Ok(keys.len())
    }

    /// Runs `unit` in a transaction, retrying on conflict with the
    /// configured policy. Inside an open transaction `unit` joins it instead.
    pub fn transaction<T, F>(&mut self, mut unit: F) -> CoreResult<T>
    where
        F: FnMut(&mut Session) -> CoreResult<T>,
    {
        if self.in_transaction() {
            return unit(self);
        }
        TransactionManager::new(self.context.config.retry.clone()).run(self, unit)
    }

    /// Whether a transaction is open on this session.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// The open transaction, if any.
    pub fn transaction_mut(&mut self) -> Option<&mut Transaction> {
        self.txn.as_mut()
    }

    pub(crate) fn install_transaction(&mut self, txn: Transaction) {
        self.txn = Some(txn);
    }

    pub(crate) fn take_transaction(&mut self) -> Option<Transaction> {
        self.txn.take()
    }

    fn resultset(&self, query: Query, start: Option<Cursor>) -> Resultset {
        let query = query.with_default_namespace(self.namespace().map(str::to_string));
        Resultset::new(
            Arc::clone(&self.context.adapter),
            Arc::clone(&self.context.registry),
            query,
            self.context.config.query_batch_size,
            start,
        )
    }

    fn load(&self, record: Record) -> CoreResult<Entity> {
        self.context.registry.lookup(record.key.kind())?.load(record)
    }
}

fn complete_keys(adapter: &dyn Adapter, records: &mut [Record]) -> CoreResult<()> {
    let partial: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.key.is_partial())
        .map(|(i, _)| i)
        .collect();
    if partial.is_empty() {
        return Ok(());
    }
    let keys: Vec<Key> = partial.iter().map(|&i| records[i].key.clone()).collect();
    let allocated = adapter.allocate_ids(&keys)?;
    if allocated.len() != partial.len() {
        return Err(CoreError::adapter("adapter allocated the wrong number of ids"));
    }
    for (i, key) in partial.into_iter().zip(allocated) {
        records[i].key = key;
    }
    Ok(())
}

/// Scoped namespace override. Dereferences to the [`Session`] and restores
/// the previous namespace when dropped.
#[derive(Debug)]
pub struct NamespaceGuard<'a> {
    session: &'a mut Session,
}

impl Deref for NamespaceGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for NamespaceGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        self.session.namespaces.pop();
    }
}
