//! SQLite driver for relmap.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate provides a synchronous SQLite connection over `libsqlite3-sys`
//! (bundled). It implements the `Connection` trait from relmap-core; wrap it
//! in a `relmap_pool::Pool` or `relmap_pool::Dedicated` to get a `Driver`.
//!
//! # Features
//!
//! - Text-only result rows (SQL NULL becomes `NULL_SENTINEL`)
//! - Transactions mapped to `BEGIN DEFERRED/IMMEDIATE/EXCLUSIVE`, plus savepoints
//! - Native `INSERT ... RETURNING` on SQLite 3.35+, rowid emulation otherwise
//! - In-memory and file-based databases, configurable flags and busy timeout
//!
//! # Example
//!
//! ```rust,ignore
//! use relmap_core::{Connection, Executor};
//! use relmap_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! conn.execute("INSERT INTO users (name) VALUES ('Alice')")?;
//! let rows = conn.query("SELECT id, name FROM users")?;
//! ```

pub mod config;
pub mod connection;
pub mod types;

pub use config::{OpenFlags, SqliteConfig};
pub use connection::SqliteConnection;

use libsqlite3_sys as ffi;

/// The SQLite library version string.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static NUL-terminated string
    unsafe { std::ffi::CStr::from_ptr(ffi::sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}

/// The SQLite library version number (e.g. 3045001).
pub fn sqlite_version_number() -> i32 {
    // SAFETY: no preconditions
    unsafe { ffi::sqlite3_libversion_number() }
}
