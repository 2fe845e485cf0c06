//! A driver backed by one connection.

use crate::transaction::SharedTransaction;
use relmap_core::error::{ConnectionError, ConnectionErrorKind};
use relmap_core::{
    Connection, Dialect, Driver, Error, Executor, IsolationLevel, Result, Row, Transaction,
};
use std::sync::{Arc, Mutex, MutexGuard};

/// Runs everything on a single connection.
///
/// This is the driver for in-memory SQLite, where each connection is its own
/// database. While a transaction is open, plain statements run inside it.
pub struct Dedicated<C: Connection> {
    conn: Arc<Mutex<C>>,
    dialect: Dialect,
    returning: bool,
}

impl<C: Connection> Clone for Dedicated<C> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            dialect: self.dialect,
            returning: self.returning,
        }
    }
}

impl<C: Connection> Dedicated<C> {
    pub fn new(conn: C) -> Self {
        Self {
            dialect: conn.dialect(),
            returning: conn.has_returning_capability(),
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, C>> {
        self.conn.lock().map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "Connection lock poisoned".to_string(),
                source: None,
            })
        })
    }

    /// Run a closure with the underlying connection.
    pub fn with_connection<R>(&self, f: impl FnOnce(&C) -> Result<R>) -> Result<R> {
        let conn = self.lock()?;
        f(&conn)
    }
}

impl<C: Connection + 'static> Driver for Dedicated<C> {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.lock()?.query(sql)
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.lock()?.execute(sql)
    }

    fn open_transaction(&self, isolation: IsolationLevel) -> Result<Transaction> {
        self.lock()?.begin(isolation)?;
        tracing::info!(isolation = isolation.as_sql(), "Transaction opened");
        Ok(Transaction::new(SharedTransaction::new(Arc::clone(
            &self.conn,
        ))))
    }

    fn has_returning_capability(&self) -> bool {
        self.returning
    }
}
