//! Transactions pinned to a single connection.

use crate::pool::PooledConnection;
use relmap_core::error::{TransactionError, TransactionErrorKind};
use relmap_core::{Connection, Error, Executor, Result, Row, TransactionOps};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where a transaction finished, for error reporting on reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    Open,
    Committed,
    RolledBack,
}

fn finished_error(state: Finished) -> Error {
    let (kind, message) = match state {
        Finished::Committed => (
            TransactionErrorKind::AlreadyCommitted,
            "Transaction already committed",
        ),
        Finished::RolledBack => (
            TransactionErrorKind::AlreadyRolledBack,
            "Transaction already rolled back",
        ),
        Finished::Open => (TransactionErrorKind::NotActive, "Transaction is not active"),
    };
    Error::Transaction(TransactionError {
        kind,
        message: message.to_string(),
    })
}

fn lock_error() -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::NotActive,
        message: "Transaction state lock poisoned".to_string(),
    })
}

/// A transaction holding a pooled connection until it finishes.
pub(crate) struct PoolTransaction<C: Connection> {
    slot: Mutex<(Finished, Option<PooledConnection<C>>)>,
}

impl<C: Connection> PoolTransaction<C> {
    pub(crate) fn new(conn: PooledConnection<C>) -> Self {
        Self {
            slot: Mutex::new((Finished::Open, Some(conn))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, (Finished, Option<PooledConnection<C>>)>> {
        self.slot.lock().map_err(|_| lock_error())
    }

    fn with_conn<R>(&self, f: impl FnOnce(&C) -> Result<R>) -> Result<R> {
        let slot = self.lock()?;
        match &slot.1 {
            Some(conn) => f(conn),
            None => Err(finished_error(slot.0)),
        }
    }

    /// Finish the transaction and hand the connection back to the pool.
    fn finish(&self, outcome: Finished) -> Result<()> {
        let mut slot = self.lock()?;
        let Some(conn) = slot.1.take() else {
            return Err(finished_error(slot.0));
        };
        slot.0 = outcome;
        let result = match outcome {
            Finished::Committed => conn.commit(),
            _ => conn.rollback(),
        };
        match result {
            Ok(()) => {
                if outcome == Finished::Committed {
                    tracing::info!("Pooled transaction committed");
                } else {
                    tracing::debug!("Pooled transaction rolled back");
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transaction end failed, discarding connection");
                let _ = conn.rollback();
                conn.discard();
                Err(e)
            }
        }
    }
}

impl<C: Connection> Executor for PoolTransaction<C> {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.with_conn(|conn| conn.query(sql))
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.with_conn(|conn| conn.execute(sql))
    }
}

impl<C: Connection> TransactionOps for PoolTransaction<C> {
    fn commit(&self) -> Result<()> {
        self.finish(Finished::Committed)
    }

    fn rollback(&self) -> Result<()> {
        self.finish(Finished::RolledBack)
    }

    fn savepoint(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| conn.savepoint(name))
    }

    fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| conn.rollback_to_savepoint(name))
    }

    fn release_savepoint(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| conn.release_savepoint(name))
    }

    fn is_active(&self) -> bool {
        self.slot.lock().is_ok_and(|slot| slot.1.is_some())
    }
}

impl<C: Connection> Drop for PoolTransaction<C> {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::debug!("Rolling back unfinished pooled transaction");
            if let Err(e) = self.finish(Finished::RolledBack) {
                tracing::warn!(error = %e, "Rollback on drop failed");
            }
        }
    }
}

/// A transaction on a connection shared through a [`crate::Dedicated`] driver.
pub(crate) struct SharedTransaction<C: Connection> {
    conn: Arc<Mutex<C>>,
    state: Mutex<Finished>,
}

impl<C: Connection> SharedTransaction<C> {
    pub(crate) fn new(conn: Arc<Mutex<C>>) -> Self {
        Self {
            conn,
            state: Mutex::new(Finished::Open),
        }
    }

    fn with_conn<R>(&self, f: impl FnOnce(&C) -> Result<R>) -> Result<R> {
        let state = *self.state.lock().map_err(|_| lock_error())?;
        if state != Finished::Open {
            return Err(finished_error(state));
        }
        let conn = self.conn.lock().map_err(|_| lock_error())?;
        f(&conn)
    }

    fn finish(&self, outcome: Finished) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| lock_error())?;
        if *state != Finished::Open {
            return Err(finished_error(*state));
        }
        *state = outcome;
        let conn = self.conn.lock().map_err(|_| lock_error())?;
        match outcome {
            Finished::Committed => {
                conn.commit()?;
                tracing::info!("Transaction committed");
                Ok(())
            }
            _ => conn.rollback(),
        }
    }
}

impl<C: Connection> Executor for SharedTransaction<C> {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.with_conn(|conn| conn.query(sql))
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.with_conn(|conn| conn.execute(sql))
    }
}

impl<C: Connection> TransactionOps for SharedTransaction<C> {
    fn commit(&self) -> Result<()> {
        self.finish(Finished::Committed)
    }

    fn rollback(&self) -> Result<()> {
        self.finish(Finished::RolledBack)
    }

    fn savepoint(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| conn.savepoint(name))
    }

    fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| conn.rollback_to_savepoint(name))
    }

    fn release_savepoint(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| conn.release_savepoint(name))
    }

    fn is_active(&self) -> bool {
        self.state
            .lock()
            .is_ok_and(|state| *state == Finished::Open)
    }
}

impl<C: Connection> Drop for SharedTransaction<C> {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::debug!("Rolling back unfinished transaction");
            if let Err(e) = self.finish(Finished::RolledBack) {
                tracing::warn!(error = %e, "Rollback on drop failed");
            }
        }
    }
}
