//! Hooks around storage operations.

use relmap_core::{Result, Transaction};
use std::fmt;

/// The storage operation a callback runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Remove,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Select => "select",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Remove => "remove",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hooks invoked by a [`Storage`](crate::Storage) around its operations.
///
/// `before` runs ahead of inserts, updates and removes; `after` runs once
/// the statement has executed, and on every entity a select returns.
/// Returning an error aborts the operation. The transaction is `None` for
/// selects run outside a transaction.
pub trait StorageCallback<E>: Send + Sync {
    fn before(&self, _op: Operation, _entity: &mut E, _tx: Option<&Transaction>) -> Result<()> {
        Ok(())
    }

    fn after(&self, _op: Operation, _entity: &mut E, _tx: Option<&Transaction>) -> Result<()> {
        Ok(())
    }
}
