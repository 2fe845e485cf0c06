//! Storage: CRUD over one table and its related tables.
//!
//! A [`Storage`] is bound to one [`Table`] and one [`Driver`]. Selects join
//! every reachable related table and fold the flat rows back into entity
//! graphs; writes cascade to related entities through child storages that
//! share the parent's transaction.
//!
//! # Example
//!
//! ```rust,ignore
//! use relmap::prelude::*;
//!
//! let mut users = Storage::new(users_table, driver);
//! users
//!     .condition(Expr::qualified("users", "age").gt(18))
//!     .sort(Expr::qualified("users", "name").asc())
//!     .limit(10);
//! let adults = users.select()?;
//! ```

mod insert;
mod join;
mod merge;
mod remove;
mod select;
mod update;

pub(crate) use merge::merge_by_key;
pub(crate) use select::LoadContext;

use crate::callback::{Operation, StorageCallback};
use crate::column::ReferenceColumn;
use crate::config::StorageConfig;
use crate::table::{Entity, Table};
use relmap_core::error::{TransactionError, TransactionErrorKind};
use relmap_core::{Driver, Error, Executor, NULL_SENTINEL, Result, Row, Transaction};
use relmap_query::{Expr, OrderBy};
use std::fmt;
use std::sync::Arc;

/// Query configuration consumed by the next select.
#[derive(Debug, Clone, Default)]
struct QueryState {
    condition: Option<Expr>,
    order: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    without_related: bool,
}

struct Attached {
    transaction: Transaction,
    /// Opened by this storage rather than supplied by the caller.
    owned: bool,
}

/// How a composite operation treats a transaction it opened when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnError {
    /// Leave it attached for the caller to commit or roll back.
    Keep,
    /// Roll it back before returning the error.
    Rollback,
}

/// What child storages of a cascading operation share with their parent.
#[derive(Clone)]
pub(crate) struct Scope {
    driver: Arc<dyn Driver>,
    config: StorageConfig,
    transaction: Transaction,
}

impl Scope {
    /// A storage for a related table, bound to this scope's transaction.
    pub(crate) fn storage<N: Entity>(&self, table: Arc<Table<N>>) -> Storage<N> {
        Storage {
            table,
            driver: Arc::clone(&self.driver),
            config: self.config.clone(),
            callbacks: Vec::new(),
            query: QueryState::default(),
            attached: Some(Attached {
                transaction: self.transaction.clone(),
                owned: false,
            }),
        }
    }
}

/// Runs statements on the attached transaction, or on the driver.
enum Target<'a> {
    Transaction(&'a Transaction),
    Driver(&'a dyn Driver),
}

impl Executor for Target<'_> {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        match self {
            Target::Transaction(tx) => tx.query(sql),
            Target::Driver(driver) => driver.query(sql),
        }
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        match self {
            Target::Transaction(tx) => tx.execute(sql),
            Target::Driver(driver) => driver.execute(sql),
        }
    }
}

/// CRUD access to the entities of one table.
///
/// Cloning is cheap: table and driver are shared. A clone starts with an
/// empty query configuration and no transaction.
pub struct Storage<E: Entity> {
    table: Arc<Table<E>>,
    driver: Arc<dyn Driver>,
    config: StorageConfig,
    callbacks: Vec<Arc<dyn StorageCallback<E>>>,
    query: QueryState,
    attached: Option<Attached>,
}

impl<E: Entity> Storage<E> {
    pub fn new(table: impl Into<Arc<Table<E>>>, driver: impl Driver + 'static) -> Self {
        Self::with_driver(table, Arc::new(driver))
    }

    /// Storage over a driver that is already shared.
    pub fn with_driver(table: impl Into<Arc<Table<E>>>, driver: Arc<dyn Driver>) -> Self {
        Self {
            table: table.into(),
            driver,
            config: StorageConfig::default(),
            callbacks: Vec::new(),
            query: QueryState::default(),
            attached: None,
        }
    }

    pub fn with_config(mut self, config: StorageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn table(&self) -> &Arc<Table<E>> {
        &self.table
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn add_callback(&mut self, callback: impl StorageCallback<E> + 'static) -> &mut Self {
        self.callbacks.push(Arc::new(callback));
        self
    }

    // ==================== Query configuration ====================

    /// Add a WHERE condition; repeated calls are ANDed.
    pub fn condition(&mut self, expr: Expr) -> &mut Self {
        self.query.condition = Some(match self.query.condition.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn sort(&mut self, order: OrderBy) -> &mut Self {
        self.query.order.push(order);
        self
    }

    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.query.limit = Some(n);
        self
    }

    pub fn offset(&mut self, n: u64) -> &mut Self {
        self.query.offset = Some(n);
        self
    }

    /// Select only this table's columns, leaving relations unloaded.
    pub fn without_related(&mut self, enabled: bool) -> &mut Self {
        self.query.without_related = enabled;
        self
    }

    // ==================== Transactions ====================

    /// The attached transaction, if any.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.attached.as_ref().map(|a| &a.transaction)
    }

    /// Open a transaction owned by this storage.
    pub fn begin(&mut self) -> Result<()> {
        if self.attached.is_some() {
            return Err(transaction_error(
                TransactionErrorKind::NestedNotSupported,
                "A transaction is already attached",
            ));
        }
        let transaction = self.driver.open_transaction(self.config.isolation)?;
        tracing::debug!(
            table = self.table.name(),
            transaction = transaction.id(),
            "Transaction opened"
        );
        self.attached = Some(Attached {
            transaction,
            owned: true,
        });
        Ok(())
    }

    /// Take part in a caller-managed transaction.
    ///
    /// Operations run inside it without committing. A transaction previously
    /// opened by this storage is finished first, as on drop.
    pub fn set_transaction(&mut self, transaction: Transaction) {
        self.finish_owned();
        self.attached = Some(Attached {
            transaction,
            owned: false,
        });
    }

    /// Detach the transaction without finishing it.
    pub fn detach_transaction(&mut self) -> Option<Transaction> {
        self.attached.take().map(|a| a.transaction)
    }

    /// Commit and detach the attached transaction.
    pub fn commit(&mut self) -> Result<()> {
        let attached = self.attached.take().ok_or_else(no_transaction)?;
        attached.transaction.commit()?;
        tracing::debug!(
            table = self.table.name(),
            transaction = attached.transaction.id(),
            "Transaction committed"
        );
        Ok(())
    }

    /// Roll back and detach the attached transaction.
    pub fn rollback(&mut self) -> Result<()> {
        let attached = self.attached.take().ok_or_else(no_transaction)?;
        attached.transaction.rollback()?;
        tracing::debug!(
            table = self.table.name(),
            transaction = attached.transaction.id(),
            "Transaction rolled back"
        );
        Ok(())
    }

    pub fn savepoint(&self, name: &str) -> Result<()> {
        self.transaction().ok_or_else(no_transaction)?.savepoint(name)
    }

    pub fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.transaction()
            .ok_or_else(no_transaction)?
            .rollback_to_savepoint(name)
    }

    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        self.transaction()
            .ok_or_else(no_transaction)?
            .release_savepoint(name)
    }

    /// Run a composite operation inside the attached transaction, or inside a
    /// new one that is committed on success.
    fn within_transaction<R>(
        &mut self,
        on_error: OnError,
        op: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        if self.attached.is_some() {
            return op(self);
        }

        self.begin()?;
        match op(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if on_error == OnError::Rollback {
                    if let Some(attached) = self.attached.take() {
                        if let Err(rollback_error) = attached.transaction.rollback() {
                            tracing::warn!(
                                table = self.table.name(),
                                error = %rollback_error,
                                "Rollback after failed operation failed"
                            );
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn scope(&self) -> Result<Scope> {
        Ok(Scope {
            driver: Arc::clone(&self.driver),
            config: self.config.clone(),
            transaction: self.transaction().ok_or_else(no_transaction)?.clone(),
        })
    }

    /// Finish an owned transaction: commit with `auto_commit`, roll back
    /// otherwise.
    fn finish_owned(&mut self) {
        let Some(attached) = self.attached.take() else {
            return;
        };
        if !attached.owned || !attached.transaction.is_active() {
            return;
        }
        let (result, action) = if self.config.auto_commit {
            (attached.transaction.commit(), "commit")
        } else {
            (attached.transaction.rollback(), "rollback")
        };
        match result {
            Ok(()) => tracing::debug!(
                table = self.table.name(),
                transaction = attached.transaction.id(),
                action,
                "Finished owned transaction"
            ),
            Err(e) => tracing::warn!(
                table = self.table.name(),
                transaction = attached.transaction.id(),
                action,
                error = %e,
                "Finishing owned transaction failed"
            ),
        }
    }

    // ==================== Execution ====================

    fn target(&self) -> Target<'_> {
        match self.transaction() {
            Some(tx) => Target::Transaction(tx),
            None => Target::Driver(self.driver.as_ref()),
        }
    }

    fn query_sql(&self, sql: &str) -> Result<Vec<Row>> {
        tracing::trace!(sql, "query");
        self.target().query(sql)
    }

    fn execute_sql(&self, sql: &str) -> Result<u64> {
        tracing::trace!(sql, "execute");
        self.target().execute(sql)
    }

    /// Foreign key a forward reference writes. NULL only where the column
    /// allows it.
    fn forward_value(&self, reference: &ReferenceColumn<E>, entity: &E) -> Result<String> {
        match reference.binding().forward_key(entity) {
            Some(key) => Ok(key),
            None if reference.settings().not_null => Err(Error::constraint(format!(
                "{}.{} is NOT NULL but no {} entity is set",
                self.table.name(),
                reference.name(),
                reference.nested_table()
            ))),
            None => Ok(NULL_SENTINEL.to_string()),
        }
    }

    fn before(&self, op: Operation, entity: &mut E) -> Result<()> {
        let tx = self.transaction();
        for callback in &self.callbacks {
            callback.before(op, entity, tx)?;
        }
        Ok(())
    }

    fn after(&self, op: Operation, entity: &mut E) -> Result<()> {
        let tx = self.transaction();
        for callback in &self.callbacks {
            callback.after(op, entity, tx)?;
        }
        Ok(())
    }
}

impl<E: Entity> Clone for Storage<E> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            driver: Arc::clone(&self.driver),
            config: self.config.clone(),
            callbacks: self.callbacks.clone(),
            query: QueryState::default(),
            attached: None,
        }
    }
}

impl<E: Entity> Drop for Storage<E> {
    fn drop(&mut self) {
        self.finish_owned();
    }
}

impl<E: Entity> fmt::Debug for Storage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("table", &self.table.name())
            .field("dialect", &self.driver.dialect())
            .field("config", &self.config)
            .field("transaction", &self.transaction())
            .finish_non_exhaustive()
    }
}

fn transaction_error(kind: TransactionErrorKind, message: &str) -> Error {
    Error::Transaction(TransactionError {
        kind,
        message: message.to_string(),
    })
}

fn no_transaction() -> Error {
    transaction_error(TransactionErrorKind::NotActive, "No transaction attached")
}
