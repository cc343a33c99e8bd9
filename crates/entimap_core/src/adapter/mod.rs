//! Backing-store bindings.
//!
//! [`Adapter`] is the narrow contract every store binding implements:
//! keyed reads and writes (single and batch), id allocation, query pages
//! and optimistic transactions. Absent entities are data
//! ([`Lookup::Missing`]), never errors.
//!
//! Two implementations ship with the crate:
//! - [`InMemoryAdapter`], the reference binding and test double
//! - [`CachedAdapter`], which decorates any adapter with a
//!   compare-and-swap cache tier ([`CacheStore`])

mod cache;
mod cached;
mod memory;

pub use cache::{CacheEntry, CacheError, CacheResult, CacheStore, CacheValue, CasOutcome, CasToken, MemoryCache};
pub use cached::CachedAdapter;
pub use memory::InMemoryAdapter;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use entimap_codec::{EntityRecord, Value};

use crate::error::CoreResult;
use crate::key::Key;
use crate::query::Query;
use crate::transaction::Transaction;
use crate::types::Cursor;

/// An entity in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Entity key. Partial only before the first store.
    pub key: Key,
    /// Stored values by store-side name.
    pub properties: BTreeMap<String, Value>,
    /// Store-side names excluded from indexes.
    pub unindexed: BTreeSet<String>,
}

impl Record {
    /// Empty record for `key`.
    #[must_use]
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
            unindexed: BTreeSet::new(),
        }
    }

    /// Store-ready bytes (canonical CBOR).
    pub fn encode(&self) -> CoreResult<Bytes> {
        let envelope = EntityRecord {
            key: self.key.to_path(),
            properties: self.properties.clone(),
            unindexed: self.unindexed.clone(),
        };
        Ok(envelope.encode()?)
    }

    /// Parses bytes produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let envelope = EntityRecord::decode(bytes)?;
        Ok(Self {
            key: Key::from_path(&envelope.key)?,
            properties: envelope.properties,
            unindexed: envelope.unindexed,
        })
    }

    /// Whether `name` is stored and indexed.
    #[must_use]
    pub fn is_indexed(&self, name: &str) -> bool {
        self.properties.contains_key(name) && !self.unindexed.contains(name)
    }
}

/// Result slot of a keyed read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// The entity exists.
    Found(Record),
    /// Nothing is stored under this key.
    Missing(Key),
}

impl Lookup {
    /// The key that was looked up.
    #[must_use]
    pub fn key(&self) -> &Key {
        match self {
            Self::Found(record) => &record.key,
            Self::Missing(key) => key,
        }
    }

    /// Returns true if the entity exists.
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// The record, if found.
    #[must_use]
    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Found(record) => Some(record),
            Self::Missing(_) => None,
        }
    }
}

/// Position and size of one page of query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Resume after this cursor.
    pub cursor: Option<Cursor>,
    /// Matches to skip before the first returned record.
    pub offset: usize,
    /// Maximum records to return.
    pub limit: usize,
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Matching records, in query order.
    pub records: Vec<Record>,
    /// Cursor positioned after the last returned record.
    pub end_cursor: Option<Cursor>,
    /// Whether more matches follow the cursor.
    pub more_results: bool,
}

/// Contract of a backing-store binding.
///
/// Implementations must be safe to call concurrently from many threads. A
/// [`Transaction`] passed to an adapter is owned by one caller at a time.
/// Batch operations preserve input order in their results.
pub trait Adapter: Send + Sync {
    /// Reads one entity.
    fn get(&self, key: &Key) -> CoreResult<Lookup> {
        let mut found = self.get_multi(std::slice::from_ref(key))?;
        Ok(found.pop().unwrap_or_else(|| Lookup::Missing(key.clone())))
    }

    /// Reads many entities. The result is aligned with `keys`.
    fn get_multi(&self, keys: &[Key]) -> CoreResult<Vec<Lookup>>;

    /// Writes one entity, allocating an id for a partial key.
    fn put(&self, record: Record) -> CoreResult<Key> {
        let key = record.key.clone();
        let mut keys = self.put_multi(vec![record])?;
        Ok(keys.pop().unwrap_or(key))
    }

    /// Writes many entities. Returns the stored keys in input order.
    fn put_multi(&self, records: Vec<Record>) -> CoreResult<Vec<Key>>;

    /// Deletes one entity. Deleting a missing entity is not an error.
    fn delete(&self, key: &Key) -> CoreResult<()> {
        self.delete_multi(std::slice::from_ref(key))
    }

    /// Deletes many entities.
    fn delete_multi(&self, keys: &[Key]) -> CoreResult<()>;

    /// Completes partial keys with fresh ids, in input order.
    fn allocate_ids(&self, keys: &[Key]) -> CoreResult<Vec<Key>>;

    /// Runs one page of a query.
    fn run_query(&self, query: &Query, page: &PageRequest) -> CoreResult<QueryResponse>;

    /// Opens a transaction.
    fn begin_transaction(&self) -> CoreResult<Transaction>;

    /// Reads through a transaction, recording the reads for conflict
    /// detection. Writes staged in the transaction are visible.
    fn get_in_transaction(&self, txn: &mut Transaction, keys: &[Key]) -> CoreResult<Vec<Lookup>>;

    /// Applies the staged operations atomically. Fails with
    /// [`CoreError::TransactionConflict`](crate::CoreError::TransactionConflict)
    /// when a touched entity changed after the transaction began.
    fn commit(&self, txn: &mut Transaction) -> CoreResult<()>;

    /// Discards the staged operations.
    fn rollback(&self, txn: &mut Transaction) -> CoreResult<()>;
}

impl<A: Adapter + ?Sized> Adapter for Arc<A> {
    fn get(&self, key: &Key) -> CoreResult<Lookup> {
        (**self).get(key)
    }

    fn get_multi(&self, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        (**self).get_multi(keys)
    }

    fn put(&self, record: Record) -> CoreResult<Key> {
        (**self).put(record)
    }

    fn put_multi(&self, records: Vec<Record>) -> CoreResult<Vec<Key>> {
        (**self).put_multi(records)
    }

    fn delete(&self, key: &Key) -> CoreResult<()> {
        (**self).delete(key)
    }

    fn delete_multi(&self, keys: &[Key]) -> CoreResult<()> {
        (**self).delete_multi(keys)
    }

    fn allocate_ids(&self, keys: &[Key]) -> CoreResult<Vec<Key>> {
        (**self).allocate_ids(keys)
    }

    fn run_query(&self, query: &Query, page: &PageRequest) -> CoreResult<QueryResponse> {
        (**self).run_query(query, page)
    }

    fn begin_transaction(&self) -> CoreResult<Transaction> {
        (**self).begin_transaction()
    }

    fn get_in_transaction(&self, txn: &mut Transaction, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        (**self).get_in_transaction(txn, keys)
    }

    fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        (**self).commit(txn)
    }

    fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        (**self).rollback(txn)
    }
}
