//! Optimistic transactions with bounded retry.
//!
//! A [`Transaction`] stages puts and deletes and records reads; the adapter
//! applies them atomically on commit or reports a conflict. The
//! [`TransactionManager`] re-runs a whole unit of work on conflict:
//!
//! ```text
//! idle -> pending -> committed
//!                 -> aborted -> (backoff) -> pending ...
//! ```

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{StagedOp, Transaction, TransactionState};
