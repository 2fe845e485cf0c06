//! SELECT statement builder.

use crate::clause::{OrderBy, SelectColumn, TableRef};
use crate::expr::Expr;
use crate::join::Join;
use relmap_core::Dialect;

/// A SELECT statement over one root table and its joins.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub columns: Vec<SelectColumn>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn new(from: TableRef) -> Self {
        Self {
            columns: Vec::new(),
            from,
            joins: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn columns(mut self, columns: Vec<SelectColumn>) -> Self {
        self.columns = columns;
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a WHERE condition, ANDed with any existing one.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Build the SELECT SQL for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut sql = String::from("SELECT ");

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<_> = self.columns.iter().map(|c| c.to_sql(dialect)).collect();
            sql.push_str(&cols.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.from.to_sql(dialect));

        for join in &self.joins {
            sql.push_str(&join.to_sql(dialect));
        }

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.to_sql(dialect));
        }

        if !self.order_by.is_empty() {
            let orders: Vec<_> = self.order_by.iter().map(|o| o.to_sql(dialect)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
            }
            (None, Some(offset)) => {
                if let Some(unbounded) = dialect.unbounded_limit() {
                    sql.push_str(&format!(" LIMIT {}", unbounded));
                }
                sql.push_str(&format!(" OFFSET {}", offset));
            }
            (None, None) => {}
        }

        sql
    }
}
