//! Read-through, write-invalidate cache decorator.
//!
//! [`CachedAdapter`] wraps any [`Adapter`] with a [`CacheStore`]. The base
//! adapter stays the source of truth; the cache only ever holds values read
//! from it.
//!
//! # Protocol
//!
//! - **Read**: a cached record is returned without touching the base. On a
//!   miss the reader first claims a lease (an `Empty` entry), reads the base,
//!   then publishes the record with `cas` against the lease token. A reader
//!   whose lease was invalidated in the meantime loses the `cas` and caches
//!   nothing.
//! - **Write**: the base write happens first, then the cache entry is
//!   replaced by `Empty` with `cas` (never by the new value). If the token
//!   moved, the entry is re-read: `Empty` means a newer invalidation already
//!   happened, anything else is deleted.
//! - **Delete**: the base delete happens first, then the entry is deleted
//!   unconditionally.
//! - Absent entities are not cached. Transactional reads and queries bypass
//!   the cache. A commit invalidates every key the transaction wrote.
//! - Cache faults are logged and bypassed for the operation at hand.

use tracing::{debug, trace, warn};

use crate::adapter::{
    Adapter, CacheError, CacheStore, CacheValue, CasOutcome, CasToken, Lookup, PageRequest,
    QueryResponse, Record,
};
use crate::config::CacheConfig;
use crate::error::CoreResult;
use crate::key::Key;
use crate::query::Query;
use crate::transaction::Transaction;

/// Cache state of one key during a read.
enum Slot {
    /// Served from the cache.
    Hit(Record),
    /// Read from the base, then publish under this token.
    Lease(String, CasToken),
    /// Read from the base without publishing.
    Bypass,
}

/// An [`Adapter`] decorated with a compare-and-swap cache.
#[derive(Debug)]
pub struct CachedAdapter<A, C> {
    base: A,
    cache: C,
    config: CacheConfig,
}

impl<A: Adapter, C: CacheStore> CachedAdapter<A, C> {
    /// Wraps `base`. With a disabled `config` every call passes through.
    pub fn new(base: A, cache: C, config: CacheConfig) -> Self {
        Self {
            base,
            cache,
            config,
        }
    }

    /// The wrapped adapter.
    pub fn base(&self) -> &A {
        &self.base
    }

    /// The cache store.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Cache key of `key`: the configured prefix followed by the hex form of
    /// the key's canonical bytes.
    pub fn cache_key(&self, key: &Key) -> CoreResult<String> {
        let hex: String = key
            .storage_key()?
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        Ok(format!("{}{hex}", self.config.key_prefix))
    }

    fn absorb(&self, operation: &'static str, error: &CacheError) {
        warn!(operation, error = %error, "cache fault, bypassing cache");
    }

    fn classify(&self, key: &Key) -> CoreResult<Slot> {
        let cache_key = self.cache_key(key)?;
        let entry = match self.cache.gets(&cache_key) {
            Ok(entry) => entry,
            Err(e) => {
                self.absorb("gets", &e);
                return Ok(Slot::Bypass);
            }
        };

        let entry = match entry {
            Some(entry) => entry,
            None => {
                if let Err(e) = self.cache.add(&cache_key, CacheValue::Empty, self.config.ttl) {
                    self.absorb("add", &e);
                    return Ok(Slot::Bypass);
                }
                match self.cache.gets(&cache_key) {
                    Ok(Some(entry)) => entry,
                    Ok(None) => return Ok(Slot::Bypass),
                    Err(e) => {
                        self.absorb("gets", &e);
                        return Ok(Slot::Bypass);
                    }
                }
            }
        };

        match entry.value {
            CacheValue::Value(bytes) => match Record::decode(&bytes) {
                Ok(record) if &record.key == key => {
                    trace!(key = %key, "cache hit");
                    Ok(Slot::Hit(record))
                }
                _ => {
                    warn!(key = %key, "undecodable cache entry, evicting");
                    if let Err(e) = self.cache.delete(&cache_key) {
                        self.absorb("delete", &e);
                    }
                    Ok(Slot::Bypass)
                }
            },
            CacheValue::Empty => {
                trace!(key = %key, "cache miss");
                Ok(Slot::Lease(cache_key, entry.token))
            }
        }
    }

    fn publish(&self, cache_key: &str, token: CasToken, record: &Record) {
        let bytes = match record.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "record could not be encoded for the cache");
                return;
            }
        };
        match self
            .cache
            .cas(cache_key, CacheValue::Value(bytes), token, self.config.ttl)
        {
            Ok(CasOutcome::Stored) => trace!(key = %record.key, "cache populated"),
            Ok(outcome) => debug!(key = %record.key, ?outcome, "lost cache lease, not populating"),
            Err(e) => self.absorb("cas", &e),
        }
    }

    fn invalidate(&self, key: &Key) -> CoreResult<()> {
        let cache_key = self.cache_key(key)?;
        let token = match self.cache.gets(&cache_key) {
            Ok(Some(entry)) => entry.token,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.absorb("gets", &e);
                return Ok(());
            }
        };

        match self
            .cache
            .cas(&cache_key, CacheValue::Empty, token, self.config.ttl)
        {
            Ok(CasOutcome::Stored | CasOutcome::Missing) => {}
            Ok(CasOutcome::Mismatch) => match self.cache.gets(&cache_key) {
                Ok(Some(entry)) if entry.value != CacheValue::Empty => {
                    debug!(key = %key, "entry repopulated during invalidation, deleting");
                    if let Err(e) = self.cache.delete(&cache_key) {
                        self.absorb("delete", &e);
                    }
                }
                Ok(_) => debug!(key = %key, "entry already invalidated"),
                Err(e) => self.absorb("gets", &e),
            },
            Err(e) => self.absorb("cas", &e),
        }
        Ok(())
    }

    fn evict(&self, key: &Key) -> CoreResult<()> {
        let cache_key = self.cache_key(key)?;
        if let Err(e) = self.cache.delete(&cache_key) {
            self.absorb("delete", &e);
        }
        Ok(())
    }
}

impl<A: Adapter, C: CacheStore> Adapter for CachedAdapter<A, C> {
    fn get_multi(&self, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        if !self.config.enabled {
            return self.base.get_multi(keys);
        }
        for key in keys {
            key.ensure_complete()?;
        }

        let slots = keys
            .iter()
            .map(|key| self.classify(key))
            .collect::<CoreResult<Vec<_>>>()?;

        let pending: Vec<Key> = keys
            .iter()
            .zip(&slots)
            .filter(|(_, slot)| !matches!(slot, Slot::Hit(_)))
            .map(|(key, _)| key.clone())
            .collect();
        let mut fetched = if pending.is_empty() {
            Vec::new()
        } else {
            self.base.get_multi(&pending)?
        }
        .into_iter();

        let mut results = Vec::with_capacity(keys.len());
        for (key, slot) in keys.iter().zip(slots) {
            let lookup = match slot {
                Slot::Hit(record) => Lookup::Found(record),
                Slot::Lease(cache_key, token) => {
                    let lookup = fetched.next().unwrap_or_else(|| Lookup::Missing(key.clone()));
                    if let Lookup::Found(record) = &lookup {
                        self.publish(&cache_key, token, record);
                    }
                    lookup
                }
                Slot::Bypass => fetched.next().unwrap_or_else(|| Lookup::Missing(key.clone())),
            };
            results.push(lookup);
        }
        Ok(results)
    }

    fn put_multi(&self, records: Vec<Record>) -> CoreResult<Vec<Key>> {
        let keys = self.base.put_multi(records)?;
        if self.config.enabled {
            for key in &keys {
                self.invalidate(key)?;
            }
        }
        Ok(keys)
    }

    fn delete_multi(&self, keys: &[Key]) -> CoreResult<()> {
        self.base.delete_multi(keys)?;
        if self.config.enabled {
            for key in keys {
                self.evict(key)?;
            }
        }
        Ok(())
    }

    fn allocate_ids(&self, keys: &[Key]) -> CoreResult<Vec<Key>> {
        self.base.allocate_ids(keys)
    }

    fn run_query(&self, query: &Query, page: &PageRequest) -> CoreResult<QueryResponse> {
        self.base.run_query(query, page)
    }

    fn begin_transaction(&self) -> CoreResult<Transaction> {
        self.base.begin_transaction()
    }

    fn get_in_transaction(&self, txn: &mut Transaction, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        self.base.get_in_transaction(txn, keys)
    }

    fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        let written = txn.written_keys();
        self.base.commit(txn)?;
        if self.config.enabled {
            for key in &written {
                self.invalidate(key)?;
            }
        }
        Ok(())
    }

    fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.base.rollback(txn)
    }
}
