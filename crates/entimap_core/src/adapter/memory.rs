//! In-process reference binding.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use entimap_codec::{KeyPath, Value};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::adapter::{Adapter, Lookup, PageRequest, QueryResponse, Record};
use crate::error::{CoreError, CoreResult};
use crate::key::{Key, KeyId};
use crate::query::{Direction, Filter, Query};
use crate::transaction::{StagedOp, Transaction, TransactionState};
use crate::types::{Cursor, SequenceNumber, TransactionId};

/// Adapter keeping every entity in memory.
///
/// Entities are ordered by key path. Every write stamps its key with a new
/// sequence number; a transaction conflicts at commit if any key it read or
/// wrote carries a stamp newer than the transaction's snapshot.
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    entities: BTreeMap<KeyPath, Record>,
    /// Sequence of the last write (including deletes) per key.
    versions: HashMap<KeyPath, u64>,
    committed_seq: u64,
    next_id: i64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            versions: HashMap::new(),
            committed_seq: 0,
            next_id: 1,
        }
    }
}

impl State {
    fn allocate(&mut self, key: &Key) -> CoreResult<Key> {
        let id = self.next_id;
        self.next_id += 1;
        key.with_id(id)
    }

    fn store(&mut self, mut record: Record) -> CoreResult<Key> {
        if record.key.is_partial() {
            record.key = self.allocate(&record.key)?;
        } else if let Some(KeyId::Id(id)) = record.key.id() {
            self.next_id = self.next_id.max(id.saturating_add(1));
        }
        let key = record.key.clone();
        let path = key.to_path();
        self.committed_seq += 1;
        self.versions.insert(path.clone(), self.committed_seq);
        self.entities.insert(path, record);
        Ok(key)
    }

    fn remove(&mut self, key: &Key) {
        let path = key.to_path();
        self.committed_seq += 1;
        self.versions.insert(path.clone(), self.committed_seq);
        self.entities.remove(&path);
    }

    fn lookup(&self, key: &Key) -> Lookup {
        match self.entities.get(&key.to_path()) {
            Some(record) => Lookup::Found(record.clone()),
            None => Lookup::Missing(key.clone()),
        }
    }
}

impl InMemoryAdapter {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entity.
    pub fn clear(&self) {
        let mut state = self.state.write();
        let paths: Vec<KeyPath> = state.entities.keys().cloned().collect();
        for path in paths {
            state.committed_seq += 1;
            let seq = state.committed_seq;
            state.versions.insert(path.clone(), seq);
            state.entities.remove(&path);
        }
    }
}

impl Adapter for InMemoryAdapter {
    fn get_multi(&self, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        for key in keys {
            key.ensure_complete()?;
        }
        let state = self.state.read();
        Ok(keys.iter().map(|key| state.lookup(key)).collect())
    }

    fn put_multi(&self, records: Vec<Record>) -> CoreResult<Vec<Key>> {
        let mut state = self.state.write();
        records.into_iter().map(|record| state.store(record)).collect()
    }

    fn delete_multi(&self, keys: &[Key]) -> CoreResult<()> {
        for key in keys {
            key.ensure_complete()?;
        }
        let mut state = self.state.write();
        for key in keys {
            state.remove(key);
        }
        Ok(())
    }

    fn allocate_ids(&self, keys: &[Key]) -> CoreResult<Vec<Key>> {
        let mut state = self.state.write();
        keys.iter().map(|key| state.allocate(key)).collect()
    }

    fn run_query(&self, query: &Query, page: &PageRequest) -> CoreResult<QueryResponse> {
        let start = match &page.cursor {
            Some(cursor) => decode_cursor(cursor)?,
            None => 0,
        };

        let state = self.state.read();
        let ancestor = query.ancestor_key().map(Key::to_path);
        let mut matches: Vec<&Record> = state
            .entities
            .values()
            .filter(|record| matches_query(record, query, ancestor.as_ref()))
            .collect();
        if !query.orders().is_empty() {
            matches.sort_by(|a, b| compare_records(a, b, query));
        }

        let total = matches.len();
        let first = start.saturating_add(page.offset).min(total);
        let last = first.saturating_add(page.limit).min(total);
        let records = matches[first..last]
            .iter()
            .map(|record| shape(record, query))
            .collect();
        trace!(total, first, last, "query page");

        Ok(QueryResponse {
            records,
            end_cursor: Some(encode_cursor(last)),
            more_results: last < total,
        })
    }

    fn begin_transaction(&self) -> CoreResult<Transaction> {
        let snapshot = SequenceNumber::new(self.state.read().committed_seq);
        let txn = Transaction::new(TransactionId::new(), snapshot);
        debug!(txn = %txn.id(), snapshot = %snapshot, "transaction started");
        Ok(txn)
    }

    fn get_in_transaction(&self, txn: &mut Transaction, keys: &[Key]) -> CoreResult<Vec<Lookup>> {
        txn.ensure_pending()?;
        for key in keys {
            key.ensure_complete()?;
        }
        let state = self.state.read();
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let lookup = match txn.pending_lookup(key) {
                Some(staged) => staged,
                None => {
                    txn.record_read(key);
                    state.lookup(key)
                }
            };
            results.push(lookup);
        }
        Ok(results)
    }

    fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_pending()?;
        let mut state = self.state.write();
        let snapshot = txn.snapshot().as_u64();
        let conflict = txn.touched_keys().find(|key| {
            state
                .versions
                .get(&key.to_path())
                .is_some_and(|&seq| seq > snapshot)
        });
        if let Some(key) = conflict {
            let message = format!("{key} was modified after {}", txn.snapshot());
            txn.mark_aborted();
            return Err(CoreError::conflict(message));
        }

        for op in txn.take_ops() {
            match op {
                StagedOp::Put(record) => {
                    state.store(record)?;
                }
                StagedOp::Delete(key) => state.remove(&key),
            }
        }
        txn.mark_committed();
        debug!(txn = %txn.id(), seq = state.committed_seq, "transaction committed");
        Ok(())
    }

    fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        match txn.state() {
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            _ => {
                txn.mark_aborted();
                Ok(())
            }
        }
    }
}

fn encode_cursor(position: usize) -> Cursor {
    Cursor::from_bytes((position as u64).to_be_bytes().to_vec())
}

fn decode_cursor(cursor: &Cursor) -> CoreResult<usize> {
    let bytes: [u8; 8] = cursor
        .as_bytes()
        .try_into()
        .map_err(|_| CoreError::invalid_operation(format!("malformed cursor {cursor}")))?;
    usize::try_from(u64::from_be_bytes(bytes))
        .map_err(|_| CoreError::invalid_operation(format!("cursor {cursor} is out of range")))
}

fn matches_query(record: &Record, query: &Query, ancestor: Option<&KeyPath>) -> bool {
    if query.kind().is_some_and(|kind| record.key.kind() != kind) {
        return false;
    }
    if record.key.namespace() != query.target_namespace() {
        return false;
    }
    if let Some(ancestor) = ancestor {
        if !ancestor.is_ancestor_of(&record.key.to_path()) {
            return false;
        }
    }
    if query
        .orders()
        .iter()
        .any(|order| !record.is_indexed(&order.property))
    {
        return false;
    }
    query.filters().iter().all(|filter| matches_filter(record, filter))
}

fn matches_filter(record: &Record, filter: &Filter) -> bool {
    if !record.is_indexed(&filter.property) {
        return false;
    }
    let matches = |stored: &Value| filter.op.accepts(stored.cmp_store(&filter.value));
    match record.properties.get(&filter.property) {
        Some(Value::Array(items)) => items.iter().any(matches),
        Some(stored) => matches(stored),
        None => false,
    }
}

/// Sort key of a possibly repeated value: the smallest element ascending,
/// the largest descending.
fn sort_value(value: Option<&Value>, direction: Direction) -> Option<&Value> {
    match value {
        Some(Value::Array(items)) => match direction {
            Direction::Ascending => items.iter().min_by(|a, b| a.cmp_store(b)),
            Direction::Descending => items.iter().max_by(|a, b| a.cmp_store(b)),
        },
        other => other,
    }
}

fn compare_records(a: &Record, b: &Record, query: &Query) -> Ordering {
    for order in query.orders() {
        let left = sort_value(a.properties.get(&order.property), order.direction);
        let right = sort_value(b.properties.get(&order.property), order.direction);
        let ordering = match (left, right) {
            (Some(l), Some(r)) => l.cmp_store(r),
            (l, r) => l.is_some().cmp(&r.is_some()),
        };
        let ordering = match order.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.key.to_path().cmp(&b.key.to_path())
}

fn shape(record: &Record, query: &Query) -> Record {
    if query.is_keys_only() {
        return Record::new(record.key.clone());
    }
    if query.projection().is_empty() {
        return record.clone();
    }
    let mut projected = Record::new(record.key.clone());
    for name in query.projection() {
        if let Some(value) = record.properties.get(name) {
            projected.properties.insert(name.clone(), value.clone());
        }
    }
    projected
}
