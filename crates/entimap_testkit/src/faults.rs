//! Fault-injection doubles for the cache and adapter seams.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use entimap_core::adapter::{CacheEntry, CacheError, CacheResult, CacheValue, CasOutcome, CasToken};
use entimap_core::{
    Adapter, CacheStore, CoreError, CoreResult, Key, Lookup, MemoryCache, PageRequest, Query,
    QueryResponse, Record, Transaction,
};

/// A [`MemoryCache`] that can be switched into failing every call.
#[derive(Debug, Default)]
pub struct FlakyCache {
    inner: MemoryCache,
    failing: AtomicBool,
    faults: AtomicUsize,
}

impl FlakyCache {
    /// A healthy cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls that failed.
    pub fn faults(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }

    /// The underlying cache.
    pub fn inner(&self) -> &MemoryCache {
        &self.inner
    }

    fn check(&self) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.faults.fetch_add(1, Ordering::SeqCst);
            return Err(CacheError::unavailable("injected cache outage"));
        }
        Ok(())
    }
}

impl CacheStore for FlakyCache {
    fn gets(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        self.check()?;
        self.inner.gets(key)
    }

    fn add(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> CacheResult<bool> {
        self.check()?;
        self.inner.add(key, value, ttl)
    }

    fn cas(
        &self,
        key: &str,
        value: CacheValue,
        token: CasToken,
        ttl: Option<Duration>,
    ) -> CacheResult<CasOutcome> {
        self.check()?;
        self.inner.cas(key, value, token, ttl)
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        self.check()?;
        self.inner.delete(key)
    }

    fn flush(&self) -> CacheResult<()> {
        self.check()?;
        self.inner.flush()
    }
}

/// Wraps an adapter and fails a number of commits with a conflict.
///
/// Injected conflicts roll the transaction back in the wrapped adapter, so
/// nothing staged is applied.
#[derive(Debug)]
pub struct ConflictingAdapter<A> {
    inner: A,
    conflicts_left: AtomicU32,
    commits: AtomicU32,
}

impl<A: Adapter> ConflictingAdapter<A> {
    /// Fails the first `conflicts` commits.
    pub fn new(inner: A, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts_left: AtomicU32::new(conflicts),
            commits: AtomicU32::new(0),
        }
    }

    /// Fails every commit.
    pub fn always(inner: A) -> Self {
        Self::new(inner, u32::MAX)
    }

    /// Commit attempts seen so far, failed or not.
    pub fn commits(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    fn take_conflict(&self) -> bool {
        self.conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                match left {
                    0 => None,
                    u32::MAX => Some(u32::MAX),
                    n => Some(n - 1),
                }
            })
            .is_ok()
    }
}

impl<A: Adapter> Adapter for ConflictingAdapter<A> {
    fn get_multi(&self, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        self.inner.get_multi(keys)
    }

    fn put_multi(&self, records: Vec<Record>) -> CoreResult<Vec<Key>> {
        self.inner.put_multi(records)
    }

    fn delete_multi(&self, keys: &[Key]) -> CoreResult<()> {
        self.inner.delete_multi(keys)
    }

    fn allocate_ids(&self, keys: &[Key]) -> CoreResult<Vec<Key>> {
        self.inner.allocate_ids(keys)
    }

    fn run_query(&self, query: &Query, page: &PageRequest) -> CoreResult<QueryResponse> {
        self.inner.run_query(query, page)
    }

    fn begin_transaction(&self) -> CoreResult<Transaction> {
        self.inner.begin_transaction()
    }

    fn get_in_transaction(&self, txn: &mut Transaction, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        self.inner.get_in_transaction(txn, keys)
    }

    fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.take_conflict() {
            self.inner.rollback(txn)?;
            return Err(CoreError::conflict(format!("injected conflict on {}", txn.id())));
        }
        self.inner.commit(txn)
    }

    fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.inner.rollback(txn)
    }
}

/// Wraps an adapter and refuses every non-transactional write.
///
/// Reads, queries and transactions pass through untouched.
#[derive(Debug)]
pub struct ReadOnlyAdapter<A> {
    inner: A,
}

impl<A: Adapter> ReadOnlyAdapter<A> {
    /// Wraps `inner`.
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    fn refuse(what: &str) -> CoreError {
        CoreError::adapter(format!("{what} refused: store is read-only"))
    }
}

impl<A: Adapter> Adapter for ReadOnlyAdapter<A> {
    fn get_multi(&self, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        self.inner.get_multi(keys)
    }

    fn put_multi(&self, _records: Vec<Record>) -> CoreResult<Vec<Key>> {
        Err(Self::refuse("put"))
    }

    fn delete_multi(&self, _keys: &[Key]) -> CoreResult<()> {
        Err(Self::refuse("delete"))
    }

    fn allocate_ids(&self, keys: &[Key]) -> CoreResult<Vec<Key>> {
        self.inner.allocate_ids(keys)
    }

    fn run_query(&self, query: &Query, page: &PageRequest) -> CoreResult<QueryResponse> {
        self.inner.run_query(query, page)
    }

    fn begin_transaction(&self) -> CoreResult<Transaction> {
        self.inner.begin_transaction()
    }

    fn get_in_transaction(&self, txn: &mut Transaction, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        self.inner.get_in_transaction(txn, keys)
    }

    fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.inner.commit(txn)
    }

    fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.inner.rollback(txn)
    }
}

/// Call counters of a [`CountingAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallCounts {
    /// `get_multi` calls.
    pub gets: usize,
    /// Keys requested through `get_multi`.
    pub keys_read: usize,
    /// `put_multi` calls.
    pub puts: usize,
    /// `delete_multi` calls.
    pub deletes: usize,
    /// `run_query` calls.
    pub queries: usize,
    /// `commit` calls.
    pub commits: usize,
}

/// Wraps an adapter and counts the calls reaching it.
#[derive(Debug)]
pub struct CountingAdapter<A> {
    inner: A,
    counts: parking_lot::Mutex<CallCounts>,
}

impl<A: Adapter> CountingAdapter<A> {
    /// Wraps `inner`.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            counts: parking_lot::Mutex::new(CallCounts::default()),
        }
    }

    /// Counters so far.
    pub fn counts(&self) -> CallCounts {
        *self.counts.lock()
    }

    /// Zeroes the counters.
    pub fn reset(&self) {
        *self.counts.lock() = CallCounts::default();
    }
}

impl<A: Adapter> Adapter for CountingAdapter<A> {
    fn get_multi(&self, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        {
            let mut counts = self.counts.lock();
            counts.gets += 1;
            counts.keys_read += keys.len();
        }
        self.inner.get_multi(keys)
    }

    fn put_multi(&self, records: Vec<Record>) -> CoreResult<Vec<Key>> {
        self.counts.lock().puts += 1;
        self.inner.put_multi(records)
    }

    fn delete_multi(&self, keys: &[Key]) -> CoreResult<()> {
        self.counts.lock().deletes += 1;
        self.inner.delete_multi(keys)
    }

    fn allocate_ids(&self, keys: &[Key]) -> CoreResult<Vec<Key>> {
        self.inner.allocate_ids(keys)
    }

    fn run_query(&self, query: &Query, page: &PageRequest) -> CoreResult<QueryResponse> {
        self.counts.lock().queries += 1;
        self.inner.run_query(query, page)
    }

    fn begin_transaction(&self) -> CoreResult<Transaction> {
        self.inner.begin_transaction()
    }

    fn get_in_transaction(&self, txn: &mut Transaction, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        self.inner.get_in_transaction(txn, keys)
    }

    fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.counts.lock().commits += 1;
        self.inner.commit(txn)
    }

    fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.inner.rollback(txn)
    }
}
