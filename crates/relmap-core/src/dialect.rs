//! SQL dialects understood by the statement renderer.

use serde::Deserialize;

/// SQL dialect a driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite 3
    #[default]
    Sqlite,
    /// PostgreSQL
    Postgres,
}

impl Dialect {
    /// Quote an identifier for this dialect.
    ///
    /// Both dialects use ANSI double quotes; embedded quotes are doubled.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Sqlite | Dialect::Postgres => crate::identifiers::quote_ident(name),
        }
    }

    /// Whether `INSERT ... RETURNING` is part of the dialect.
    pub const fn supports_returning(self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::Postgres)
    }

    /// `LIMIT` value meaning "no limit", needed when only an offset is given.
    pub const fn unbounded_limit(self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => Some("-1"),
            Dialect::Postgres => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
