//! Transaction manager.

use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{CoreError, CoreResult};
use crate::session::Session;

/// Runs units of work in transactions, retrying on conflict.
///
/// Each attempt begins a fresh transaction, runs the whole unit against it
/// and commits. Conflicts (raised by the unit or by the commit) roll the
/// attempt back and retry after an exponential backoff. Any other error
/// rolls back and is returned at once. After `max_attempts` conflicting
/// attempts the run fails with [`CoreError::RetriesExceeded`].
#[derive(Debug, Clone)]
pub struct TransactionManager {
    retry: RetryConfig,
}

impl TransactionManager {
    /// Creates a manager with the given retry policy.
    #[must_use]
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    /// The retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Runs `unit` in a transaction on `session`.
    ///
    /// The unit may run several times and must not have side effects outside
    /// the session that cannot be repeated. An invalid retry policy fails
    /// with [`CoreError::InvalidConfig`] before the unit runs.
    pub fn run<T, F>(&self, session: &mut Session, mut unit: F) -> CoreResult<T>
    where
        F: FnMut(&mut Session) -> CoreResult<T>,
    {
        self.retry.validate()?;
        if session.in_transaction() {
            return Err(CoreError::invalid_operation(
                "session already has an open transaction",
            ));
        }
        let adapter = Arc::clone(session.context().adapter());
        let attempts = self.retry.max_attempts;

        for attempt in 1..=attempts {
            let txn = adapter.begin_transaction()?;
            debug!(attempt, txn = %txn.id(), "transaction attempt");
            session.install_transaction(txn);
            let outcome = unit(session);
            let mut txn = session.take_transaction().ok_or_else(|| {
                CoreError::invalid_operation("transaction was removed from the session")
            })?;

            let result = outcome.and_then(|value| adapter.commit(&mut txn).map(|()| value));
            let error = match result {
                Ok(value) => {
                    debug!(attempt, txn = %txn.id(), "transaction committed");
                    return Ok(value);
                }
                Err(error) => error,
            };

            if txn.is_pending() {
                if let Err(rollback) = adapter.rollback(&mut txn) {
                    warn!(txn = %txn.id(), error = %rollback, "rollback failed");
                }
            }
            if !error.is_conflict() {
                return Err(error);
            }

            if attempt < attempts {
                let delay = self.retry.backoff_for(attempt);
                debug!(attempt, ?delay, error = %error, "transaction conflict, retrying");
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }

        warn!(attempts, "transaction retries exhausted");
        Err(CoreError::RetriesExceeded { attempts })
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
