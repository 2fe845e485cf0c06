//! Core types and traits for relmap.
//!
//! This crate provides the foundations shared by the mapping engine and its drivers:
//!
//! - [`Error`] and the crate-wide [`Result`]
//! - [`SqlValue`], [`Converter`] and [`NullPredicate`] for typed value <-> SQL string conversion
//! - [`Row`] for string-valued result rows
//! - [`Connection`], [`Driver`] and [`Transaction`] for synchronous execution
//! - [`Dialect`] and identifier helpers

pub mod connection;
pub mod dialect;
pub mod error;
pub mod identifiers;
pub mod row;
pub mod value;

pub use connection::{
    Connection, Driver, Executor, IsolationLevel, ReturningInsert, Transaction, TransactionOps,
    emulate_returning,
};
pub use dialect::Dialect;
pub use error::{Error, Result};
pub use identifiers::{is_valid_identifier, quote_ident, validate_identifier};
pub use row::{ColumnNames, Row};
pub use value::{Converter, NULL_SENTINEL, NullPredicate, SqlValue, is_null_sentinel};
