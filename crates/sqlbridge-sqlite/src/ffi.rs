//! Thin safe layer over `libsqlite3-sys`.
//!
//! Everything that touches raw pointers lives here: statement preparation
//! and finalization, parameter binding, column reads and error extraction.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use crate::native::SqliteValue;
use libsqlite3_sys as sys;
use sqlbridge_core::{Error, QueryErrorKind};
use std::ffi::{CStr, CString, c_int};
use std::ptr;

pub use sys::{sqlite3, sqlite3_stmt};

/// Get the SQLite library version as a string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a pointer to a static string
    unsafe {
        let ptr = sys::sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// Get the SQLite library version as a number, e.g. `3045000`.
pub fn version_number() -> i32 {
    // SAFETY: always safe to call
    unsafe { sys::sqlite3_libversion_number() }
}

/// Convert an SQLite result code to its English description.
pub fn error_string(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a pointer to a static string
    unsafe {
        let ptr = sys::sqlite3_errstr(code);
        if ptr.is_null() {
            return "unknown error".to_string();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Most recent error message on a connection.
///
/// # Safety
/// `db` must be a valid, open connection handle.
pub unsafe fn errmsg(db: *mut sqlite3) -> String {
    // SAFETY: caller guarantees db is valid; errmsg never returns null for a valid handle
    unsafe {
        let ptr = sys::sqlite3_errmsg(db);
        if ptr.is_null() {
            return "unknown error".to_string();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Map a (possibly extended) result code to the error taxonomy.
pub fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code & 0xff {
        sys::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        sys::SQLITE_BUSY | sys::SQLITE_LOCKED => QueryErrorKind::Busy,
        sys::SQLITE_PERM | sys::SQLITE_AUTH | sys::SQLITE_READONLY => QueryErrorKind::Permission,
        sys::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        sys::SQLITE_TOOBIG => QueryErrorKind::TooBig,
        sys::SQLITE_INTERRUPT => QueryErrorKind::Interrupted,
        sys::SQLITE_ERROR | sys::SQLITE_MISUSE | sys::SQLITE_RANGE => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    }
}

/// Byte length of a text or blob parameter as SQLite takes it.
///
/// Lengths past `c_int::MAX` fail with `SQLITE_TOOBIG`.
fn bind_length(len: usize) -> Result<c_int, c_int> {
    c_int::try_from(len).map_err(|_| sys::SQLITE_TOOBIG)
}

/// Build a query error from the connection's current error state.
///
/// # Safety
/// `db` must be a valid, open connection handle.
pub unsafe fn last_error(db: *mut sqlite3, sql: &str) -> Error {
    // SAFETY: caller guarantees db is valid
    let (code, message) = unsafe { (sys::sqlite3_extended_errcode(db), errmsg(db)) };
    Error::query(error_code_to_kind(code), sql, message)
}

/// Execute a script of statements with `sqlite3_exec`, discarding rows.
///
/// # Safety
/// `db` must be a valid, open connection handle.
pub unsafe fn exec(db: *mut sqlite3, sql: &str) -> Result<(), Error> {
    let c_sql = CString::new(sql)
        .map_err(|_| Error::query(QueryErrorKind::Syntax, sql, "SQL contains null byte"))?;

    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: all pointers are valid; no callback is registered
    let rc = unsafe { sys::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

    if rc == sys::SQLITE_OK {
        return Ok(());
    }

    let message = if errmsg.is_null() {
        error_string(rc)
    } else {
        // SAFETY: errmsg was allocated by SQLite and is freed exactly once
        unsafe {
            let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
            sys::sqlite3_free(errmsg.cast());
            msg
        }
    };
    Err(Error::query(error_code_to_kind(rc), sql, message))
}

/// A prepared statement, finalized on drop.
pub struct Statement {
    raw: *mut sqlite3_stmt,
    db: *mut sqlite3,
}

impl Statement {
    /// Prepare the first statement in `sql`.
    ///
    /// Returns `Ok(None)` when `sql` holds no statement at all (only
    /// whitespace or comments). Fails when anything other than whitespace
    /// and semicolons follows the first statement.
    ///
    /// # Safety
    /// `db` must be a valid, open connection handle that outlives the
    /// returned statement.
    pub unsafe fn prepare(db: *mut sqlite3, sql: &str) -> Result<Option<Self>, Error> {
        let c_sql = CString::new(sql)
            .map_err(|_| Error::query(QueryErrorKind::Syntax, sql, "SQL contains null byte"))?;

        let mut raw: *mut sqlite3_stmt = ptr::null_mut();
        let mut tail: *const std::ffi::c_char = ptr::null();

        // SAFETY: all pointers are valid for the duration of the call
        let rc = unsafe {
            sys::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                &mut tail,
            )
        };

        if rc != sys::SQLITE_OK {
            // SAFETY: db is valid
            return Err(unsafe { last_error(db, sql) });
        }
        if raw.is_null() {
            return Ok(None);
        }

        let stmt = Self { raw, db };

        if !tail.is_null() {
            // SAFETY: tail points into c_sql, which is still alive and NUL terminated
            let rest = unsafe { CStr::from_ptr(tail) }.to_string_lossy();
            if !rest.trim_matches(|c: char| c.is_whitespace() || c == ';').is_empty() {
                return Err(Error::query(
                    QueryErrorKind::Syntax,
                    sql,
                    "only one statement can be executed at a time",
                ));
            }
        }

        Ok(Some(stmt))
    }

    /// Bind parameters to 1-based positions in order.
    pub fn bind_all(&self, sql: &str, params: &[SqliteValue]) -> Result<(), Error> {
        // SAFETY: raw is a valid statement for the lifetime of self
        let expected = unsafe { sys::sqlite3_bind_parameter_count(self.raw) };
        if usize::try_from(expected).unwrap_or(0) != params.len() {
            return Err(Error::query(
                QueryErrorKind::Syntax,
                sql,
                format!(
                    "statement expects {} parameters but {} were given",
                    expected,
                    params.len()
                ),
            ));
        }

        for (i, param) in params.iter().enumerate() {
            let index = (i + 1) as c_int;
            let rc = self.bind(index, param);
            if rc != sys::SQLITE_OK {
                let msg = if rc == sys::SQLITE_TOOBIG {
                    error_string(rc)
                } else {
                    // SAFETY: db is valid while the statement lives
                    unsafe { errmsg(self.db) }
                };
                return Err(Error::query(
                    error_code_to_kind(rc),
                    sql,
                    format!("Failed to bind parameter {}: {}", index, msg),
                ));
            }
        }
        Ok(())
    }

    fn bind(&self, index: c_int, value: &SqliteValue) -> c_int {
        // SAFETY: raw is valid; SQLITE_TRANSIENT makes SQLite copy text and blob data
        unsafe {
            match value {
                SqliteValue::Null => sys::sqlite3_bind_null(self.raw, index),
                SqliteValue::Integer(v) => sys::sqlite3_bind_int64(self.raw, index, *v),
                SqliteValue::Real(v) => sys::sqlite3_bind_double(self.raw, index, *v),
                SqliteValue::Text(s) => match bind_length(s.len()) {
                    Ok(len) => sys::sqlite3_bind_text(
                        self.raw,
                        index,
                        s.as_ptr().cast(),
                        len,
                        sys::SQLITE_TRANSIENT(),
                    ),
                    Err(rc) => rc,
                },
                SqliteValue::Blob(b) => match bind_length(b.len()) {
                    Ok(len) => sys::sqlite3_bind_blob(
                        self.raw,
                        index,
                        b.as_ptr().cast(),
                        len,
                        sys::SQLITE_TRANSIENT(),
                    ),
                    Err(rc) => rc,
                },
            }
        }
    }

    /// Advance the statement. `Ok(true)` means a row is available.
    pub fn step(&self, sql: &str) -> Result<bool, Error> {
        // SAFETY: raw is valid
        match unsafe { sys::sqlite3_step(self.raw) } {
            sys::SQLITE_ROW => Ok(true),
            sys::SQLITE_DONE => Ok(false),
            // SAFETY: db is valid while the statement lives
            _ => Err(unsafe { last_error(self.db, sql) }),
        }
    }

    /// Whether the statement leaves the database unchanged.
    pub fn is_readonly(&self) -> bool {
        // SAFETY: raw is valid
        unsafe { sys::sqlite3_stmt_readonly(self.raw) != 0 }
    }

    pub fn column_count(&self) -> usize {
        // SAFETY: raw is valid
        usize::try_from(unsafe { sys::sqlite3_column_count(self.raw) }).unwrap_or(0)
    }

    pub fn column_name(&self, index: usize) -> String {
        // SAFETY: raw is valid and index < column_count
        unsafe {
            let ptr = sys::sqlite3_column_name(self.raw, index as c_int);
            if ptr.is_null() {
                format!("col{}", index)
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        }
    }

    /// Read one column of the current row.
    pub fn read_column(&self, index: usize) -> SqliteValue {
        let i = index as c_int;
        // SAFETY: raw is valid, positioned on a row, and i < column_count.
        // Text and blob pointers are copied before the next SQLite call.
        unsafe {
            match sys::sqlite3_column_type(self.raw, i) {
                sys::SQLITE_INTEGER => SqliteValue::Integer(sys::sqlite3_column_int64(self.raw, i)),
                sys::SQLITE_FLOAT => SqliteValue::Real(sys::sqlite3_column_double(self.raw, i)),
                sys::SQLITE_TEXT => {
                    let ptr = sys::sqlite3_column_text(self.raw, i);
                    let len = usize::try_from(sys::sqlite3_column_bytes(self.raw, i)).unwrap_or(0);
                    if ptr.is_null() {
                        SqliteValue::Text(String::new())
                    } else {
                        let bytes = std::slice::from_raw_parts(ptr, len);
                        SqliteValue::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                }
                sys::SQLITE_BLOB => {
                    let ptr = sys::sqlite3_column_blob(self.raw, i);
                    let len = usize::try_from(sys::sqlite3_column_bytes(self.raw, i)).unwrap_or(0);
                    if ptr.is_null() || len == 0 {
                        SqliteValue::Blob(Vec::new())
                    } else {
                        SqliteValue::Blob(std::slice::from_raw_parts(ptr.cast::<u8>(), len).to_vec())
                    }
                }
                _ => SqliteValue::Null,
            }
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw came from sqlite3_prepare_v2 and is finalized exactly once
        unsafe {
            sys::sqlite3_finalize(self.raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let v = version();
        assert!(v.starts_with('3'), "Expected SQLite 3.x, got {}", v);
        assert!(version_number() >= 3_000_000);
    }

    #[test]
    fn test_error_string() {
        assert_eq!(error_string(sys::SQLITE_OK), "not an error");
        assert_eq!(error_string(sys::SQLITE_BUSY), "database is locked");
        assert_eq!(error_string(sys::SQLITE_CONSTRAINT), "constraint failed");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(error_code_to_kind(sys::SQLITE_CONSTRAINT), QueryErrorKind::Constraint);
        // SQLITE_CONSTRAINT_UNIQUE is an extended code over SQLITE_CONSTRAINT
        assert_eq!(error_code_to_kind(2067), QueryErrorKind::Constraint);
        assert_eq!(error_code_to_kind(sys::SQLITE_LOCKED), QueryErrorKind::Busy);
        assert_eq!(error_code_to_kind(sys::SQLITE_ERROR), QueryErrorKind::Syntax);
        assert_eq!(error_code_to_kind(sys::SQLITE_IOERR), QueryErrorKind::Database);
        assert_eq!(error_code_to_kind(sys::SQLITE_TOOBIG), QueryErrorKind::TooBig);
    }

    #[test]
    fn test_bind_length_limit() {
        assert_eq!(bind_length(0), Ok(0));
        assert_eq!(bind_length(c_int::MAX as usize), Ok(c_int::MAX));
        assert_eq!(bind_length(c_int::MAX as usize + 1), Err(sys::SQLITE_TOOBIG));
        assert_eq!(bind_length(usize::MAX), Err(sys::SQLITE_TOOBIG));
    }
}
