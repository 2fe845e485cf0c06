//! Reading result columns in their string form.

use libsqlite3_sys as ffi;
use relmap_core::NULL_SENTINEL;
use std::ffi::{CStr, c_int};

/// Read a column value from a result row as text.
///
/// SQL NULL becomes [`NULL_SENTINEL`]; integers, reals and blobs use SQLite's
/// own text conversion.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that has just returned SQLITE_ROW
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> String {
    // SAFETY: guaranteed by the caller
    unsafe {
        if ffi::sqlite3_column_type(stmt, index) == ffi::SQLITE_NULL {
            return NULL_SENTINEL.to_string();
        }

        let ptr = ffi::sqlite3_column_text(stmt, index);
        let len = ffi::sqlite3_column_bytes(stmt, index);
        if ptr.is_null() || len <= 0 {
            String::new()
        } else {
            #[allow(clippy::cast_sign_loss)]
            let slice = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
            String::from_utf8_lossy(slice).into_owned()
        }
    }
}

/// Get the column name from a result.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: guaranteed by the caller
    unsafe {
        let ptr = ffi::sqlite3_column_name(stmt, index);
        if ptr.is_null() {
            None
        } else {
            CStr::from_ptr(ptr).to_str().ok().map(String::from)
        }
    }
}

/// Human-readable description of a SQLite result code.
pub fn error_string(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string for any code
    unsafe {
        let ptr = ffi::sqlite3_errstr(code);
        if ptr.is_null() {
            format!("SQLite error {}", code)
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}
