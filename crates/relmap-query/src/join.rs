//! JOIN clause types.

use crate::clause::TableRef;
use crate::expr::Expr;
use relmap_core::Dialect;

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Type of join
    pub join_type: JoinType,
    /// Table to join
    pub table: TableRef,
    /// ON condition
    pub on: Expr,
}

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

impl Join {
    /// Create an INNER JOIN.
    pub fn inner(table: TableRef, on: Expr) -> Self {
        Self {
            join_type: JoinType::Inner,
            table,
            on,
        }
    }

    /// Create a LEFT JOIN.
    pub fn left(table: TableRef, on: Expr) -> Self {
        Self {
            join_type: JoinType::Left,
            table,
            on,
        }
    }

    /// Widen the ON condition with another alternative.
    pub fn or_on(&mut self, on: Expr) {
        let current = std::mem::replace(&mut self.on, Expr::Raw(String::new()));
        self.on = current.or(on);
    }

    /// Generate SQL for this JOIN clause.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        format!(
            " {} {} ON {}",
            self.join_type.as_str(),
            self.table.to_sql(dialect),
            self.on.to_sql(dialect)
        )
    }
}
