//! relmap - relational mapping of typed entity graphs onto SQL tables.
//!
//! relmap maps plain Rust structs onto tables without derive macros:
//!
//! - [`Column`]s bind one field to one physical column through an [`Accessor`]
//! - [`ReferenceColumn`]s bind a nested entity, or a collection of them, to a
//!   related [`Table`] with a [`RelationType`] and [`Cascade`] flags
//! - a [`Storage`] selects whole entity graphs with LEFT joins and cascades
//!   inserts, updates and removes through related tables
//! - every write runs inside a [`Transaction`], opened implicitly when the
//!   caller did not supply one
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Hero {
//!     id: i64,
//!     name: String,
//!     age: Option<i32>,
//! }
//!
//! let heroes = Table::builder("heroes")
//!     .column(Column::new(
//!         "id",
//!         Accessor::field(|h: &Hero| &h.id, |h: &mut Hero| &mut h.id),
//!         ColumnSettings::new().primary_key().auto_increment(),
//!     ))
//!     .column(Column::new(
//!         "name",
//!         Accessor::field(|h: &Hero| &h.name, |h: &mut Hero| &mut h.name),
//!         ColumnSettings::new().not_null(),
//!     ))
//!     .column(Column::new(
//!         "age",
//!         Accessor::field(|h: &Hero| &h.age, |h: &mut Hero| &mut h.age),
//!         ColumnSettings::new(),
//!     ))
//!     .build()?;
//!
//! let driver = Dedicated::new(relmap_sqlite::SqliteConnection::open_memory()?);
//! let mut storage = Storage::new(heroes, driver);
//!
//! let mut hero = Hero { name: "Spider-Man".into(), age: Some(25), ..Hero::default() };
//! storage.insert(&mut hero)?; // hero.id is filled from RETURNING
//!
//! let adults = storage
//!     .condition(Expr::qualified("heroes", "age").gt(18))
//!     .sort(Expr::qualified("heroes", "name").asc())
//!     .select()?;
//! ```

mod accessor;
mod callback;
mod column;
mod config;
mod relation;
mod storage;
mod table;

pub use accessor::Accessor;
pub use callback::{Operation, StorageCallback};
pub use column::{
    Cascade, Column, ColumnInfo, ColumnSettings, Container, ReferenceColumn, RelationType,
};
pub use config::StorageConfig;
pub use storage::Storage;
pub use table::{ColumnVisitor, Entity, ReferenceInfo, Table, TableBuilder, TableColumn, TableInfo};

// Re-export the layers below the engine
pub use relmap_core::error::{QueryError, QueryErrorKind, SchemaError, SchemaErrorKind};
pub use relmap_core::{
    Connection, Converter, Dialect, Driver, Error, Executor, IsolationLevel, NULL_SENTINEL,
    NullPredicate, Result, ReturningInsert, Row, SqlValue, Transaction, TransactionOps,
};
pub use relmap_pool::{Dedicated, Pool, PoolConfig, PoolStats, PooledConnection};
pub use relmap_query::{Expr, OrderBy, OrderDirection};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use relmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Mapping
        Accessor,
        Cascade,
        Column,
        ColumnSettings,
        // Drivers
        Dedicated,
        Driver,
        Error,
        // Conditions
        Expr,
        IsolationLevel,
        Operation,
        OrderBy,
        Pool,
        PoolConfig,
        ReferenceColumn,
        RelationType,
        Result,
        // Storage
        Storage,
        StorageCallback,
        StorageConfig,
        Table,
        Transaction,
    };
}
