//! SQLite connection implementation.
//!
//! This module wraps SQLite's C API (through `libsqlite3-sys`) and implements
//! the [`Connection`] trait from relmap-core. Every result column is read as
//! text, so rows match the string model the mapping engine works with.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::result_large_err)] // Error type is defined in relmap-core
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers
#![allow(clippy::if_not_else)] // Clearer for error handling

use crate::config::SqliteConfig;
use crate::types;
mod ffi {
    pub use libsqlite3_sys::*;

    // The pregenerated libsqlite3-sys bindings omit `sqlite3_close_v2`; the
    // bundled SQLite library still exports it.
    unsafe extern "C" {
        pub fn sqlite3_close_v2(db: *mut sqlite3) -> std::ffi::c_int;
    }
}
use relmap_core::{
    Connection, Dialect, Error, Executor, IsolationLevel, Result, Row,
    error::{
        ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind, TransactionError,
        TransactionErrorKind,
    },
    row::ColumnNames,
};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

/// First SQLite release with `INSERT ... RETURNING`.
const RETURNING_MIN_VERSION: c_int = 3_035_000;

/// Inner state of the SQLite connection, protected by a mutex.
struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is only touched while holding the Mutex, so it is never
// used from two threads at once.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
///
/// All access to the underlying handle is serialized through a mutex.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
    native_returning: bool,
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if !db.is_null() {
                // SAFETY: db is valid, errmsg returns a valid C string
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            } else {
                types::error_string(rc)
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database '{}': {}", config.path, msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        let conn = Self {
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
            native_returning: config.native_returning,
        };

        if config.foreign_keys {
            conn.execute_raw("PRAGMA foreign_keys = ON")?;
        }

        tracing::debug!(
            path = %config.path,
            busy_timeout_ms = config.busy_timeout_ms,
            foreign_keys = config.foreign_keys,
            "Opened SQLite connection"
        );

        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteInner>> {
        self.inner.lock().map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "SQLite connection lock poisoned".to_string(),
                source: None,
            })
        })
    }

    /// Execute SQL directly without preparing (DDL, several statements at once).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock()?;
        exec(inner.db, sql)
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> Result<u64> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_changes(inner.db) } as u64)
    }

    /// Whether a transaction opened through [`Connection::begin`] is open.
    pub fn in_transaction(&self) -> bool {
        self.lock().is_ok_and(|inner| inner.in_transaction)
    }

    fn query_rows(&self, sql: &str) -> Result<Vec<Row>> {
        tracing::trace!(sql = %sql, "SQLite query");
        let inner = self.lock()?;
        let stmt = prepare_stmt(inner.db, sql)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt) };
        let mut col_names = Vec::with_capacity(col_count as usize);
        for i in 0..col_count {
            // SAFETY: stmt is valid and i is in range
            let name =
                unsafe { types::column_name(stmt, i) }.unwrap_or_else(|| format!("col{}", i));
            col_names.push(name);
        }
        let columns = Arc::new(ColumnNames::new(col_names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            let rc = unsafe { ffi::sqlite3_step(stmt) };
            match rc {
                ffi::SQLITE_ROW => {
                    let mut values = Vec::with_capacity(col_count as usize);
                    for i in 0..col_count {
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        values.push(unsafe { types::read_column(stmt, i) });
                    }
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => {
                    let err = step_error(inner.db, sql);
                    // SAFETY: stmt is valid
                    unsafe { ffi::sqlite3_finalize(stmt) };
                    return Err(err);
                }
            }
        }

        // SAFETY: stmt is valid
        unsafe { ffi::sqlite3_finalize(stmt) };

        tracing::trace!(rows = rows.len(), "SQLite query finished");
        Ok(rows)
    }

    fn execute_statement(&self, sql: &str) -> Result<u64> {
        tracing::trace!(sql = %sql, "SQLite execute");
        let inner = self.lock()?;
        let stmt = prepare_stmt(inner.db, sql)?;

        // SAFETY: stmt is valid
        let mut rc = unsafe { ffi::sqlite3_step(stmt) };
        while rc == ffi::SQLITE_ROW {
            // SAFETY: stmt is valid
            rc = unsafe { ffi::sqlite3_step(stmt) };
        }

        let result = if rc == ffi::SQLITE_DONE {
            // SAFETY: db is valid
            Ok(unsafe { ffi::sqlite3_changes(inner.db) } as u64)
        } else {
            Err(step_error(inner.db, sql))
        };

        // SAFETY: stmt is valid
        unsafe { ffi::sqlite3_finalize(stmt) };
        result
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.lock() {
            if !inner.db.is_null() {
                // SAFETY: db is valid and no statements outlive their call
                unsafe {
                    ffi::sqlite3_close_v2(inner.db);
                }
            }
        }
    }
}

impl Executor for SqliteConnection {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.query_rows(sql)
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.execute_statement(sql)
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn begin(&self, isolation: IsolationLevel) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.in_transaction {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NestedNotSupported,
                message: "Already in a transaction".to_string(),
            }));
        }

        // SQLite has no isolation levels; approximate with lock modes.
        let begin_sql = match isolation {
            IsolationLevel::Serializable => "BEGIN EXCLUSIVE",
            IsolationLevel::RepeatableRead | IsolationLevel::ReadCommitted => "BEGIN IMMEDIATE",
            IsolationLevel::ReadUncommitted => "BEGIN DEFERRED",
        };

        exec(inner.db, begin_sql)?;
        inner.in_transaction = true;
        tracing::debug!(statement = begin_sql, "SQLite transaction started");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.in_transaction {
            return Err(not_in_transaction());
        }
        exec(inner.db, "COMMIT")?;
        inner.in_transaction = false;
        tracing::debug!("SQLite transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.in_transaction {
            return Err(not_in_transaction());
        }
        exec(inner.db, "ROLLBACK")?;
        inner.in_transaction = false;
        tracing::debug!("SQLite transaction rolled back");
        Ok(())
    }

    fn has_returning_capability(&self) -> bool {
        // SAFETY: no preconditions
        self.native_returning && unsafe { ffi::sqlite3_libversion_number() } >= RETURNING_MIN_VERSION
    }
}

// Helper functions

fn not_in_transaction() -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::NotActive,
        message: "Not in a transaction".to_string(),
    })
}

fn null_byte_error(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        code: None,
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn exec(db: *mut ffi::sqlite3, sql: &str) -> Result<()> {
    tracing::trace!(sql = %sql, "SQLite exec");
    let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

    if rc != ffi::SQLITE_OK {
        let msg = if !errmsg.is_null() {
            // SAFETY: errmsg is a valid C string allocated by SQLite
            unsafe {
                let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                ffi::sqlite3_free(errmsg.cast());
                msg
            }
        } else {
            types::error_string(rc)
        };

        return Err(Error::Query(QueryError {
            kind: error_code_to_kind(rc),
            sql: Some(sql.to_string()),
            code: Some(rc),
            message: msg,
            source: None,
        }));
    }

    Ok(())
}

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_sql.as_ptr(),
            c_sql.as_bytes().len() as c_int,
            &mut stmt,
            ptr::null_mut(),
        )
    };

    if rc != ffi::SQLITE_OK {
        return Err(db_error(db, sql));
    }

    Ok(stmt)
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    db_error(db, sql)
}

fn db_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe {
        let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned();
        (msg, ffi::sqlite3_errcode(db))
    };

    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        code: Some(code),
        message: msg,
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Deadlock,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_INTERRUPT => QueryErrorKind::Cancelled,
        _ => QueryErrorKind::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::NULL_SENTINEL;

    fn memory_with_table() -> SqliteConnection {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, score REAL)")
            .unwrap();
        conn
    }

    #[test]
    fn test_open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert_eq!(conn.dialect(), Dialect::Sqlite);
        conn.ping().unwrap();
    }

    #[test]
    fn test_execute_raw_and_rowid() {
        let conn = memory_with_table();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice')")
            .unwrap();
        assert_eq!(conn.changes().unwrap(), 1);
        assert_eq!(conn.last_insert_rowid().unwrap(), 1);
    }

    #[test]
    fn test_query_reads_text() {
        let conn = memory_with_table();
        conn.execute("INSERT INTO test (name, score) VALUES ('Alice', 2.5), ('Bob', NULL)")
            .unwrap();

        let rows = conn.query("SELECT id, name, score FROM test ORDER BY id").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_by_name("id"), Some("1"));
        assert_eq!(rows[0].get_by_name("name"), Some("Alice"));
        assert_eq!(rows[0].get_named::<f64>("score").unwrap(), 2.5);
        assert_eq!(rows[1].get_by_name("score"), Some(NULL_SENTINEL));
        assert!(rows[1].is_null("score"));
    }

    #[test]
    fn test_execute_returns_changes() {
        let conn = memory_with_table();
        conn.execute("INSERT INTO test (name) VALUES ('a'), ('b'), ('c')")
            .unwrap();
        let changed = conn.execute("UPDATE test SET score = '1' WHERE id > '1'").unwrap();
        assert_eq!(changed, 2);
    }

    #[test]
    fn test_transaction_commit_and_rollback() {
        let conn = memory_with_table();

        conn.begin(IsolationLevel::default()).unwrap();
        assert!(conn.in_transaction());
        conn.execute("INSERT INTO test (name) VALUES ('Alice')").unwrap();
        conn.rollback().unwrap();
        assert!(conn.query("SELECT * FROM test").unwrap().is_empty());

        conn.begin(IsolationLevel::Serializable).unwrap();
        conn.execute("INSERT INTO test (name) VALUES ('Bob')").unwrap();
        conn.commit().unwrap();
        assert_eq!(conn.query("SELECT * FROM test").unwrap().len(), 1);
    }

    #[test]
    fn test_nested_begin_is_rejected() {
        let conn = memory_with_table();
        conn.begin(IsolationLevel::default()).unwrap();
        let err = conn.begin(IsolationLevel::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NestedNotSupported,
                ..
            })
        ));
        conn.rollback().unwrap();
        assert!(conn.commit().is_err());
    }

    #[test]
    fn test_savepoints() {
        let conn = memory_with_table();
        conn.begin(IsolationLevel::default()).unwrap();
        conn.execute("INSERT INTO test (name) VALUES ('kept')").unwrap();
        conn.savepoint("sp1").unwrap();
        conn.execute("INSERT INTO test (name) VALUES ('dropped')").unwrap();
        conn.rollback_to_savepoint("sp1").unwrap();
        conn.release_savepoint("sp1").unwrap();
        conn.commit().unwrap();

        let rows = conn.query("SELECT name FROM test").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0), Some("kept"));
    }

    #[test]
    fn test_constraint_error_carries_sql_and_code() {
        let conn = memory_with_table();
        conn.execute("INSERT INTO test (id, name) VALUES ('1', 'a')").unwrap();
        let err = conn
            .execute("INSERT INTO test (id, name) VALUES ('1', 'b')")
            .unwrap_err();
        match err {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Constraint);
                assert_eq!(q.code.map(|c| c & 0xff), Some(ffi::SQLITE_CONSTRAINT));
                assert!(q.sql.unwrap().contains("VALUES ('1', 'b')"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_syntax_error() {
        let conn = SqliteConnection::open_memory().unwrap();
        let err = conn.query("SELEC nothing").unwrap_err();
        assert_eq!(err.sql(), Some("SELEC nothing"));
    }

    #[test]
    fn test_returning_capability_follows_config() {
        let native = SqliteConnection::open_memory().unwrap();
        assert!(native.has_returning_capability());

        let emulated =
            SqliteConnection::open(&SqliteConfig::memory().native_returning(false)).unwrap();
        assert!(!emulated.has_returning_capability());
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw(
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id));",
        )
        .unwrap();
        let err = conn
            .execute("INSERT INTO child (parent_id) VALUES ('42')")
            .unwrap_err();
        assert!(matches!(err, Error::Query(ref q) if q.is_constraint_violation()));
    }
}
