//! SQL clause types (ORDER BY, table and column references).

use crate::expr::Expr;
use relmap_core::Dialect;

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: OrderDirection,
    pub nulls: Option<NullsOrder>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// NULLS FIRST/LAST ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

impl OrderBy {
    pub fn new(expr: Expr, direction: OrderDirection) -> Self {
        Self {
            expr,
            direction,
            nulls: None,
        }
    }

    /// Set NULLS FIRST.
    pub fn nulls_first(mut self) -> Self {
        self.nulls = Some(NullsOrder::First);
        self
    }

    /// Set NULLS LAST.
    pub fn nulls_last(mut self) -> Self {
        self.nulls = Some(NullsOrder::Last);
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut sql = self.expr.to_sql(dialect);

        sql.push_str(match self.direction {
            OrderDirection::Asc => " ASC",
            OrderDirection::Desc => " DESC",
        });

        if let Some(nulls) = self.nulls {
            sql.push_str(match nulls {
                NullsOrder::First => " NULLS FIRST",
                NullsOrder::Last => " NULLS LAST",
            });
        }

        sql
    }
}

/// A table, optionally qualified by schema and renamed with `AS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            alias: None,
        }
    }

    pub fn with_schema(schema: Option<String>, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
            alias: None,
        }
    }

    /// Refer to the table as `alias`. An alias equal to the name is dropped.
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.alias = (alias != self.name).then_some(alias);
        self
    }

    /// Name other clauses use to qualify this table's columns.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let table = match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                dialect.quote_identifier(schema),
                dialect.quote_identifier(&self.name)
            ),
            None => dialect.quote_identifier(&self.name),
        };
        match &self.alias {
            Some(alias) => format!("{} AS {}", table, dialect.quote_identifier(alias)),
            None => table,
        }
    }
}

/// A projected column: `"table"."name" AS "alias"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    pub table: String,
    pub name: String,
    pub alias: Option<String>,
}

impl SelectColumn {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            alias: None,
        }
    }

    /// Project under the alias `table.name`.
    pub fn aliased(table: impl Into<String>, name: impl Into<String>) -> Self {
        let table = table.into();
        let name = name.into();
        let alias = format!("{}.{}", table, name);
        Self {
            table,
            name,
            alias: Some(alias),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let column = format!(
            "{}.{}",
            dialect.quote_identifier(&self.table),
            dialect.quote_identifier(&self.name)
        );
        match &self.alias {
            Some(alias) => format!("{} AS {}", column, dialect.quote_identifier(alias)),
            None => column,
        }
    }
}
