//! Statement builders for INSERT, UPDATE, DELETE operations.

use crate::clause::TableRef;
use crate::expr::{Expr, quote_literal};
use relmap_core::{Dialect, ReturningInsert};

/// Multi-row INSERT with an optional RETURNING list.
///
/// Rows hold converted values; the null sentinel renders as `NULL`. An insert
/// without columns renders `DEFAULT VALUES` and covers a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub returning: Vec<String>,
}

impl Insert {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            columns: Vec::new(),
            rows: Vec::new(),
            returning: Vec::new(),
        }
    }

    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn row(mut self, values: Vec<String>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn returning(mut self, columns: Vec<String>) -> Self {
        self.returning = columns;
        self
    }

    fn head_sql(&self, dialect: Dialect) -> String {
        if self.columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.table.to_sql(dialect))
        } else {
            let cols: Vec<_> = self
                .columns
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect();
            format!(
                "INSERT INTO {} ({}) VALUES ",
                self.table.to_sql(dialect),
                cols.join(", ")
            )
        }
    }

    fn row_sql(values: &[String]) -> String {
        let values: Vec<_> = values.iter().map(|v| quote_literal(v)).collect();
        format!("({})", values.join(", "))
    }

    fn returning_columns(&self, dialect: Dialect) -> Vec<String> {
        self.returning
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect()
    }

    /// Build the INSERT SQL for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut sql = self.head_sql(dialect);
        if !self.columns.is_empty() {
            let rows: Vec<_> = self.rows.iter().map(|r| Self::row_sql(r)).collect();
            sql.push_str(&rows.join(", "));
        }
        if !self.returning.is_empty() {
            sql.push_str(" RETURNING ");
            sql.push_str(&self.returning_columns(dialect).join(", "));
        }
        sql
    }

    /// Split into single-row inserts for drivers that emulate RETURNING.
    pub fn to_returning_fallback(&self, dialect: Dialect) -> ReturningInsert {
        let head = self.head_sql(dialect);
        let statements = if self.columns.is_empty() {
            vec![head]
        } else {
            self.rows
                .iter()
                .map(|r| format!("{}{}", head, Self::row_sql(r)))
                .collect()
        };
        ReturningInsert {
            statements,
            table: self.table.to_sql(dialect),
            returning: self.returning_columns(dialect),
        }
    }
}

/// UPDATE of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: TableRef,
    pub sets: Vec<(String, String)>,
    pub where_clause: Option<Expr>,
}

impl Update {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            sets: Vec::new(),
            where_clause: None,
        }
    }

    /// Set `column` to a converted value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.sets.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Whether there is anything to update.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Build the UPDATE SQL for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let sets: Vec<_> = self
            .sets
            .iter()
            .map(|(column, value)| {
                format!(
                    "{} = {}",
                    dialect.quote_identifier(column),
                    quote_literal(value)
                )
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            self.table.to_sql(dialect),
            sets.join(", ")
        );

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.to_sql(dialect));
        }

        sql
    }
}

/// DELETE from one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: TableRef,
    pub where_clause: Option<Expr>,
}

impl Delete {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            where_clause: None,
        }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Build the DELETE SQL for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut sql = format!("DELETE FROM {}", self.table.to_sql(dialect));
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.to_sql(dialect));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::NULL_SENTINEL;

    fn people() -> Insert {
        Insert::new(TableRef::new("people"))
            .columns(vec!["name".into(), "age".into()])
            .row(vec!["Ann".into(), "31".into()])
            .row(vec!["O'Neil".into(), NULL_SENTINEL.into()])
    }

    #[test]
    fn test_multi_row_insert_with_returning() {
        let sql = people()
            .returning(vec!["id".into(), "name".into(), "age".into()])
            .to_sql(Dialect::Sqlite);
        assert_eq!(
            sql,
            "INSERT INTO \"people\" (\"name\", \"age\") VALUES ('Ann', '31'), ('O''Neil', NULL) RETURNING \"id\", \"name\", \"age\""
        );
    }

    #[test]
    fn test_default_values_insert() {
        let sql = Insert::new(TableRef::new("counters"))
            .row(Vec::new())
            .returning(vec!["id".into()])
            .to_sql(Dialect::Postgres);
        assert_eq!(sql, "INSERT INTO \"counters\" DEFAULT VALUES RETURNING \"id\"");
    }

    #[test]
    fn test_returning_fallback_splits_rows() {
        let fallback = people()
            .returning(vec!["id".into()])
            .to_returning_fallback(Dialect::Sqlite);
        assert_eq!(
            fallback.statements,
            vec![
                "INSERT INTO \"people\" (\"name\", \"age\") VALUES ('Ann', '31')".to_string(),
                "INSERT INTO \"people\" (\"name\", \"age\") VALUES ('O''Neil', NULL)".to_string(),
            ]
        );
        assert_eq!(fallback.table, "\"people\"");
        assert_eq!(fallback.returning, vec!["\"id\"".to_string()]);
    }

    #[test]
    fn test_update() {
        let update = Update::new(TableRef::new("people"))
            .set("name", "Bea")
            .set("age", NULL_SENTINEL)
            .filter(Expr::qualified("people", "id").eq(7));
        assert_eq!(
            update.to_sql(Dialect::Sqlite),
            "UPDATE \"people\" SET \"name\" = 'Bea', \"age\" = NULL WHERE \"people\".\"id\" = '7'"
        );
        assert!(Update::new(TableRef::new("people")).is_empty());
    }

    #[test]
    fn test_delete() {
        let delete = Delete::new(TableRef::with_schema(Some("app".into()), "people")).filter(
            Expr::qualified("people", "id")
                .eq(1)
                .or(Expr::qualified("people", "id").eq(2)),
        );
        assert_eq!(
            delete.to_sql(Dialect::Postgres),
            "DELETE FROM \"app\".\"people\" WHERE \"people\".\"id\" = '1' OR \"people\".\"id\" = '2'"
        );
    }
}
