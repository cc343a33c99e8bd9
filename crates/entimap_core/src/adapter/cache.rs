//! Compare-and-swap cache tier.
//!
//! [`CacheStore`] is the contract of a shared cache (memcached-style `gets`
//! and `cas`). Every stored entry carries a [`CasToken`] that changes on each
//! write to the entry, so a writer holding a stale token always loses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Version token of a cache entry.
pub type CasToken = u64;

/// Cache-tier failures. Never surfaced past
/// [`CachedAdapter`](crate::adapter::CachedAdapter).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The cache could not be reached.
    #[error("cache unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The cache rejected or failed an operation.
    #[error("cache backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

impl CacheError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Payload of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// Store-ready record bytes.
    Value(Bytes),
    /// Placeholder: the key was invalidated or a reader holds a lease on it.
    Empty,
}

/// A cache entry with its version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Payload.
    pub value: CacheValue,
    /// Version token.
    pub token: CasToken,
}

/// Outcome of a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The entry was replaced.
    Stored,
    /// The entry changed since the token was read.
    Mismatch,
    /// The entry no longer exists.
    Missing,
}

/// A shared cache with per-entry version tokens.
pub trait CacheStore: Send + Sync {
    /// Reads an entry with its token.
    fn gets(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Stores an entry only if none exists. Returns whether it was stored.
    fn add(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Replaces an entry only if its token is still `token`.
    fn cas(
        &self,
        key: &str,
        value: CacheValue,
        token: CasToken,
        ttl: Option<Duration>,
    ) -> CacheResult<CasOutcome>;

    /// Removes an entry unconditionally.
    fn delete(&self, key: &str) -> CacheResult<()>;

    /// Removes every entry.
    fn flush(&self) -> CacheResult<()>;
}

impl<C: CacheStore + ?Sized> CacheStore for std::sync::Arc<C> {
    fn gets(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        (**self).gets(key)
    }

    fn add(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> CacheResult<bool> {
        (**self).add(key, value, ttl)
    }

    fn cas(
        &self,
        key: &str,
        value: CacheValue,
        token: CasToken,
        ttl: Option<Duration>,
    ) -> CacheResult<CasOutcome> {
        (**self).cas(key, value, token, ttl)
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        (**self).delete(key)
    }

    fn flush(&self) -> CacheResult<()> {
        (**self).flush()
    }
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Slots {
    entries: HashMap<String, Slot>,
    last_token: CasToken,
}

impl Slots {
    fn live(&mut self, key: &str, now: Instant) -> Option<&Slot> {
        if self.entries.get(key).is_some_and(|slot| !slot.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }

    fn insert(&mut self, key: &str, value: CacheValue, ttl: Option<Duration>, now: Instant) {
        self.last_token += 1;
        let slot = Slot {
            entry: CacheEntry {
                value,
                token: self.last_token,
            },
            expires_at: ttl.map(|ttl| now + ttl),
        };
        self.entries.insert(key.to_string(), slot);
    }
}

/// In-process [`CacheStore`] with optional expiry.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: Mutex<Slots>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache {
    fn gets(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let mut slots = self.slots.lock();
        Ok(slots.live(key, Instant::now()).map(|slot| slot.entry.clone()))
    }

    fn add(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> CacheResult<bool> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        if slots.live(key, now).is_some() {
            return Ok(false);
        }
        slots.insert(key, value, ttl, now);
        Ok(true)
    }

    fn cas(
        &self,
        key: &str,
        value: CacheValue,
        token: CasToken,
        ttl: Option<Duration>,
    ) -> CacheResult<CasOutcome> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let outcome = match slots.live(key, now) {
            None => CasOutcome::Missing,
            Some(slot) if slot.entry.token != token => CasOutcome::Mismatch,
            Some(_) => CasOutcome::Stored,
        };
        if outcome == CasOutcome::Stored {
            slots.insert(key, value, ttl, now);
        }
        Ok(outcome)
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        self.slots.lock().entries.remove(key);
        Ok(())
    }

    fn flush(&self) -> CacheResult<()> {
        self.slots.lock().entries.clear();
        Ok(())
    }
}
