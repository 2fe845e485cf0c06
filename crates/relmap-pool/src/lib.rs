//! Connection drivers for relmap.
//!
//! - [`Pool`] hands out connections created lazily by a factory, blocking up
//!   to a configurable timeout when every connection is in use.
//! - [`Dedicated`] runs everything on one connection.
//!
//! Both implement [`relmap_core::Driver`]; transactions opened through them pin
//! their connection until committed, rolled back, or dropped (which rolls back).

mod config;
mod dedicated;
mod pool;
mod transaction;

pub use config::PoolConfig;
pub use dedicated::Dedicated;
pub use pool::{Pool, PoolStats, PooledConnection};
