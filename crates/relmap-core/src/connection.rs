//! Database connection traits.
//!
//! This module defines the driver-side abstractions the mapping engine runs on:
//!
//! - [`Executor`] - anything that runs SQL text and returns rows or a change count
//! - [`Connection`] - one physical connection with transaction control
//! - [`Driver`] - a source of statements and transactions (a pool, a dedicated connection)
//! - [`Transaction`] - a cloneable handle to an open transaction
//! - [`IsolationLevel`] - SQL transaction isolation levels
//!
//! All operations are synchronous and run on the calling thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::row::Row;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Dirty reads, non-repeatable reads and phantoms possible.
    ReadUncommitted,

    /// Only committed changes from others are visible.
    #[default]
    ReadCommitted,

    /// Consistent snapshot for the duration of the transaction.
    RepeatableRead,

    /// Transactions appear to execute sequentially.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Runs SQL text.
pub trait Executor {
    /// Run a statement that produces rows.
    fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Run a statement and return the number of rows it changed.
    fn execute(&self, sql: &str) -> Result<u64>;
}

/// A single database connection.
pub trait Connection: Executor + Send {
    fn dialect(&self) -> Dialect;

    /// Start a transaction. Nested transactions are an error; use savepoints.
    fn begin(&self, isolation: IsolationLevel) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn savepoint(&self, name: &str) -> Result<()> {
        self.execute(&format!("SAVEPOINT {}", crate::quote_ident(name)))
            .map(|_| ())
    }

    fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", crate::quote_ident(name)))
            .map(|_| ())
    }

    fn release_savepoint(&self, name: &str) -> Result<()> {
        self.execute(&format!("RELEASE SAVEPOINT {}", crate::quote_ident(name)))
            .map(|_| ())
    }

    /// Whether this connection understands `INSERT ... RETURNING`.
    fn has_returning_capability(&self) -> bool {
        self.dialect().supports_returning()
    }

    /// Check that the connection is still usable.
    fn ping(&self) -> Result<()> {
        self.query("SELECT 1").map(|_| ())
    }
}

/// Operations of an open transaction, implemented by drivers.
///
/// Implementations must make `commit`/`rollback` idempotent in the sense that
/// a second call returns a [`TransactionError`](crate::error::TransactionError)
/// instead of touching the database.
pub trait TransactionOps: Executor + Send + Sync {
    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn savepoint(&self, name: &str) -> Result<()>;

    fn rollback_to_savepoint(&self, name: &str) -> Result<()>;

    fn release_savepoint(&self, name: &str) -> Result<()>;

    /// False once committed or rolled back.
    fn is_active(&self) -> bool;
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to an open transaction.
///
/// Clones refer to the same transaction, which is how cascading child
/// operations take part in their parent's unit of work.
#[derive(Clone)]
pub struct Transaction {
    ops: Arc<dyn TransactionOps>,
    id: u64,
}

impl Transaction {
    pub fn new(ops: impl TransactionOps + 'static) -> Self {
        Self {
            ops: Arc::new(ops),
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Process-unique id of this transaction.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.ops.is_active()
    }

    pub fn commit(&self) -> Result<()> {
        self.ops.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.ops.rollback()
    }

    pub fn savepoint(&self, name: &str) -> Result<()> {
        self.ops.savepoint(name)
    }

    pub fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.ops.rollback_to_savepoint(name)
    }

    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        self.ops.release_savepoint(name)
    }

    /// Whether two handles refer to the same transaction.
    pub fn same_as(&self, other: &Transaction) -> bool {
        self.id == other.id
    }
}

impl Executor for Transaction {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.ops.query(sql)
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.ops.execute(sql)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// An INSERT that asked for RETURNING on a driver that has to emulate it.
#[derive(Debug, Clone)]
pub struct ReturningInsert {
    /// One single-row INSERT per entity, without a RETURNING clause.
    pub statements: Vec<String>,
    /// Qualified, quoted table name.
    pub table: String,
    /// Quoted columns to read back after each insert.
    pub returning: Vec<String>,
}

/// Emulate `INSERT ... RETURNING` by inserting row by row and reading each
/// row back through its rowid.
pub fn emulate_returning(
    dialect: Dialect,
    executor: &dyn Executor,
    insert: &ReturningInsert,
) -> Result<Vec<Row>> {
    if dialect != Dialect::Sqlite {
        return Err(Error::Custom(format!(
            "no RETURNING emulation for dialect {}",
            dialect
        )));
    }
    tracing::debug!(
        table = %insert.table,
        rows = insert.statements.len(),
        "Emulating INSERT RETURNING"
    );
    let select_back = format!(
        "SELECT {} FROM {} WHERE rowid = last_insert_rowid()",
        insert.returning.join(", "),
        insert.table
    );
    let mut rows = Vec::with_capacity(insert.statements.len());
    for statement in &insert.statements {
        executor.execute(statement)?;
        let mut fetched = executor.query(&select_back)?;
        if fetched.len() != 1 {
            return Err(Error::mismatch(
                select_back.clone(),
                format!("expected 1 row after insert, got {}", fetched.len()),
            ));
        }
        rows.append(&mut fetched);
    }
    Ok(rows)
}

/// A source of statements and transactions.
///
/// Statements run outside a transaction go through `query`/`execute`;
/// everything inside a unit of work runs on the [`Transaction`] returned by
/// `open_transaction`.
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn query(&self, sql: &str) -> Result<Vec<Row>>;

    fn execute(&self, sql: &str) -> Result<u64>;

    fn open_transaction(&self, isolation: IsolationLevel) -> Result<Transaction>;

    fn has_returning_capability(&self) -> bool;

    /// Run an INSERT with RETURNING semantics on a driver without native support.
    fn returning_fallback(
        &self,
        executor: &dyn Executor,
        insert: &ReturningInsert,
    ) -> Result<Vec<Row>> {
        emulate_returning(self.dialect(), executor, insert)
    }
}

impl<D: Driver + ?Sized> Driver for Arc<D> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        (**self).query(sql)
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        (**self).execute(sql)
    }

    fn open_transaction(&self, isolation: IsolationLevel) -> Result<Transaction> {
        (**self).open_transaction(isolation)
    }

    fn has_returning_capability(&self) -> bool {
        (**self).has_returning_capability()
    }

    fn returning_fallback(
        &self,
        executor: &dyn Executor,
        insert: &ReturningInsert,
    ) -> Result<Vec<Row>> {
        (**self).returning_fallback(executor, insert)
    }
}
