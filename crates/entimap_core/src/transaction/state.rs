//! Staged operations and lifecycle of a single transaction.

use std::collections::HashSet;

use crate::adapter::{Lookup, Record};
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::types::{SequenceNumber, TransactionId};

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Open; operations are staged.
    Pending,
    /// Staged operations were applied.
    Committed,
    /// Staged operations were discarded.
    Aborted,
}

/// An operation waiting for commit.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedOp {
    /// Insert or replace an entity. The record key is complete.
    Put(Record),
    /// Delete an entity.
    Delete(Key),
}

impl StagedOp {
    /// Key the operation writes.
    #[must_use]
    pub fn key(&self) -> &Key {
        match self {
            Self::Put(record) => &record.key,
            Self::Delete(key) => key,
        }
    }
}

/// A unit of work against one adapter.
///
/// Operations are staged in order and only become visible on commit. A
/// transaction is never reused after commit or abort, and is confined to the
/// caller that opened it.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    snapshot: SequenceNumber,
    state: TransactionState,
    ops: Vec<StagedOp>,
    reads: HashSet<Key>,
}

impl Transaction {
    /// Creates a pending transaction. Bindings call this from
    /// [`Adapter::begin_transaction`](crate::adapter::Adapter::begin_transaction).
    #[must_use]
    pub fn new(id: TransactionId, snapshot: SequenceNumber) -> Self {
        Self {
            id,
            snapshot,
            state: TransactionState::Pending,
            ops: Vec::new(),
            reads: HashSet::new(),
        }
    }

    /// Identifier assigned by the adapter.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Store position the transaction started from.
    #[must_use]
    pub fn snapshot(&self) -> SequenceNumber {
        self.snapshot
    }

    /// Where the transaction is in its lifecycle.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still open.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == TransactionState::Pending
    }

    /// Stages a put. The record key must be complete.
    pub fn put(&mut self, record: Record) -> CoreResult<()> {
        self.ensure_pending()?;
        record.key.ensure_complete()?;
        self.ops.push(StagedOp::Put(record));
        Ok(())
    }

    /// Stages a delete.
    pub fn delete(&mut self, key: Key) -> CoreResult<()> {
        self.ensure_pending()?;
        key.ensure_complete()?;
        self.ops.push(StagedOp::Delete(key));
        Ok(())
    }

    /// Remembers that `key` was read, so a concurrent write to it fails the
    /// commit.
    pub fn record_read(&mut self, key: &Key) {
        self.reads.insert(key.clone());
    }

    /// Latest staged state of `key`, if this transaction wrote it.
    #[must_use]
    pub fn pending_lookup(&self, key: &Key) -> Option<Lookup> {
        self.ops.iter().rev().find(|op| op.key() == key).map(|op| match op {
            StagedOp::Put(record) => Lookup::Found(record.clone()),
            StagedOp::Delete(key) => Lookup::Missing(key.clone()),
        })
    }

    /// Staged operations in order.
    #[must_use]
    pub fn ops(&self) -> &[StagedOp] {
        &self.ops
    }

    /// Keys written by staged operations, deduplicated, in first-write order.
    #[must_use]
    pub fn written_keys(&self) -> Vec<Key> {
        let mut seen = HashSet::new();
        self.ops
            .iter()
            .map(StagedOp::key)
            .filter(|key| seen.insert(*key))
            .cloned()
            .collect()
    }

    /// Keys read or written, for conflict detection.
    pub fn touched_keys(&self) -> impl Iterator<Item = &Key> {
        self.reads
            .iter()
            .chain(self.ops.iter().map(StagedOp::key))
    }

    /// Takes the staged operations out, leaving the log empty.
    pub(crate) fn take_ops(&mut self) -> Vec<StagedOp> {
        std::mem::take(&mut self.ops)
    }

    /// Called by the adapter once every staged operation has been applied.
    pub fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    /// Marks the transaction as aborted and drops staged operations.
    pub fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
        self.ops.clear();
    }

    /// Fails unless the transaction is still open.
    pub fn ensure_pending(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Pending => Ok(()),
            finished => Err(CoreError::invalid_operation(format!(
                "transaction {} is {finished:?}",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Transaction {
        Transaction::new(TransactionId::new(), SequenceNumber::new(0))
    }

    fn key(id: i64) -> Key {
        Key::from_id("Person", id).unwrap()
    }

    #[test]
    fn new_transaction_is_pending() {
        let txn = open();
        assert!(txn.is_pending());
        assert_eq!(txn.state(), TransactionState::Pending);
        assert!(txn.ops().is_empty());
    }

    #[test]
    fn staged_writes_are_visible_to_lookups() {
        let mut txn = open();
        txn.put(Record::new(key(1))).unwrap();
        assert!(txn.pending_lookup(&key(1)).unwrap().is_found());
        txn.delete(key(1)).unwrap();
        assert!(!txn.pending_lookup(&key(1)).unwrap().is_found());
        assert!(txn.pending_lookup(&key(2)).is_none());
        assert_eq!(txn.written_keys(), vec![key(1)]);
    }

    #[test]
    fn partial_keys_cannot_be_staged() {
        let mut txn = open();
        let partial = Key::partial("Person").unwrap();
        assert!(txn.put(Record::new(partial.clone())).is_err());
        assert!(txn.delete(partial).is_err());
    }

    #[test]
    fn touched_keys_include_reads() {
        let mut txn = open();
        txn.record_read(&key(1));
        txn.put(Record::new(key(2))).unwrap();
        let touched: HashSet<&Key> = txn.touched_keys().collect();
        assert_eq!(touched.len(), 2);
    }

    #[test]
    fn finished_transactions_reject_operations() {
        let mut txn = open();
        txn.put(Record::new(key(1))).unwrap();
        txn.mark_aborted();
        assert!(txn.ops().is_empty());
        assert!(txn.put(Record::new(key(1))).is_err());

        let mut txn = open();
        txn.mark_committed();
        assert!(txn.delete(key(1)).is_err());
        assert!(txn.ensure_pending().is_err());
    }
}
