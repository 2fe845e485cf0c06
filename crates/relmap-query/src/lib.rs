//! SQL statement construction for relmap.
//!
//! `relmap-query` is the **SQL text layer** of the engine. It renders the
//! statements the storage layer issues:
//!
//! - [`Expr`] conditions for WHERE and ON clauses
//! - [`Select`] with LEFT joins, ordering and paging
//! - [`Insert`], [`Update`] and [`Delete`]
//!
//! Values are inlined as escaped string literals produced by
//! [`relmap_core::SqlValue`]; the rendered text runs through a
//! [`relmap_core::Driver`].

pub mod builder;
pub mod clause;
pub mod expr;
pub mod join;
pub mod select;

pub use builder::{Delete, Insert, Update};
pub use clause::{NullsOrder, OrderBy, OrderDirection, SelectColumn, TableRef};
pub use expr::{BinaryOp, Expr, quote_literal};
pub use join::{Join, JoinType};
pub use select::Select;
