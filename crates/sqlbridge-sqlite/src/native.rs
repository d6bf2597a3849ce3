//! Native SQLite handle.
//!
//! [`NativeDatabase`] owns one `sqlite3*` behind a mutex and exposes the
//! small synchronous surface the driver needs: open, execute one statement,
//! execute a script and close.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use crate::ffi::{self, Statement};
use libsqlite3_sys as sys;
use sqlbridge_core::{ConnectionErrorKind, Error};
use std::ffi::{CString, c_int};
use std::fmt;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

// libsqlite3-sys blocklists `sqlite3_close_v2` from its bundled bindings;
// the symbol is still present in the linked bundled SQLite.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut sys::sqlite3) -> c_int;
}

/// A value in one of SQLite's storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum SqliteValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// SQLite storage classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqliteType {
    Integer,
    Real,
    Text,
    Blob,
    Null,
}

impl SqliteValue {
    pub fn sqlite_type(&self) -> SqliteType {
        match self {
            SqliteValue::Null => SqliteType::Null,
            SqliteValue::Integer(_) => SqliteType::Integer,
            SqliteValue::Real(_) => SqliteType::Real,
            SqliteValue::Text(_) => SqliteType::Text,
            SqliteValue::Blob(_) => SqliteType::Blob,
        }
    }
}

impl SqliteType {
    /// The storage class name as SQLite's `typeof()` reports it.
    pub const fn as_str(self) -> &'static str {
        match self {
            SqliteType::Integer => "integer",
            SqliteType::Real => "real",
            SqliteType::Text => "text",
            SqliteType::Blob => "blob",
            SqliteType::Null => "null",
        }
    }
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in multi-thread mode.
    pub no_mutex: bool,
    /// Open in serialized mode.
    pub full_mutex: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Read-write access; the database must already exist.
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= sys::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= sys::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= sys::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= sys::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= sys::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= sys::SQLITE_OPEN_FULLMUTEX;
        }

        // Default to read-write if no mode specified
        if flags & (sys::SQLITE_OPEN_READONLY | sys::SQLITE_OPEN_READWRITE) == 0 {
            flags |= sys::SQLITE_OPEN_READWRITE | sys::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

/// How to open a native database.
#[derive(Clone)]
pub struct OpenOptions {
    /// File name, or `:memory:`.
    pub name: String,
    /// Directory the file lives in. Ignored for in-memory databases.
    pub location: Option<String>,
    /// Key passed to `PRAGMA key` right after opening.
    pub encryption_key: Option<String>,
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            name: MEMORY.to_string(),
            location: None,
            encryption_key: None,
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

// The key never shows up in logs.
impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("flags", &self.flags)
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .finish()
    }
}

const MEMORY: &str = ":memory:";

impl OpenOptions {
    /// Options for a named database file.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Options for a private in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn is_memory(&self) -> bool {
        self.name == MEMORY
    }

    /// The path handed to `sqlite3_open_v2`.
    pub fn path(&self) -> String {
        match &self.location {
            Some(location) if !self.is_memory() => {
                Path::new(location).join(&self.name).to_string_lossy().into_owned()
            }
            _ => self.name.clone(),
        }
    }
}

/// Result of running one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqliteValue>>,
    /// Rows changed by a writing statement. `None` for read-only statements.
    pub rows_affected: Option<u64>,
    /// Rowid of the row a writing statement inserted, if any.
    pub insert_id: Option<i64>,
}

struct Handle {
    db: *mut sys::sqlite3,
}

// SAFETY: the handle is only touched while the owning Mutex is held, so the
// connection is never used from two threads at once.
unsafe impl Send for Handle {}

impl Handle {
    fn close(&mut self) -> Result<(), Error> {
        if self.db.is_null() {
            return Ok(());
        }
        // SAFETY: db is a valid open handle; it is nulled right after
        let rc = unsafe { sqlite3_close_v2(self.db) };
        self.db = ptr::null_mut();
        if rc == sys::SQLITE_OK {
            Ok(())
        } else {
            Err(Error::connection(
                ConnectionErrorKind::Disconnected,
                format!("Failed to close database: {}", ffi::error_string(rc)),
            ))
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "closing dropped SQLite handle failed");
        }
    }
}

struct NativeInner {
    handle: Mutex<Handle>,
    path: String,
}

/// A shared handle to one open SQLite database.
///
/// Clones refer to the same connection. Dropping the last clone closes it.
#[derive(Clone)]
pub struct NativeDatabase {
    inner: Arc<NativeInner>,
}

impl fmt::Debug for NativeDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDatabase")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl NativeDatabase {
    /// Open a database.
    pub fn open(options: &OpenOptions) -> Result<Self, Error> {
        let path = options.path();
        let c_path = CString::new(path.as_str()).map_err(|_| {
            Error::connection(ConnectionErrorKind::Connect, "Invalid path: contains null byte")
        })?;

        let mut db: *mut sys::sqlite3 = ptr::null_mut();
        let flags = options.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { sys::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        // From here on the handle is closed on every error path.
        let mut handle = Handle { db };

        if rc != sys::SQLITE_OK {
            let msg = if handle.db.is_null() {
                ffi::error_string(rc)
            } else {
                // SAFETY: db is non-null; sqlite3_open_v2 returns a handle even on failure
                unsafe { ffi::errmsg(handle.db) }
            };
            return Err(Error::connection(
                ConnectionErrorKind::Connect,
                format!("Failed to open database: {}", msg),
            ));
        }

        if options.busy_timeout_ms > 0 {
            // past c_int::MAX the timeout would wrap negative and stop waiting
            let timeout = c_int::try_from(options.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                sys::sqlite3_busy_timeout(handle.db, timeout);
            }
        }

        if let Some(key) = &options.encryption_key {
            let pragma = format!("PRAGMA key = '{}'", key.replace('\'', "''"));
            // SAFETY: db is valid
            unsafe { ffi::exec(handle.db, &pragma) }.map_err(|e| {
                Error::connection(
                    ConnectionErrorKind::Connect,
                    format!("Failed to apply encryption key: {}", e),
                )
            })?;
        }

        tracing::debug!(path = %path, "opened SQLite database");

        Ok(Self {
            inner: Arc::new(NativeInner {
                handle: Mutex::new(handle),
                path,
            }),
        })
    }

    /// Open a private in-memory database.
    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&OpenOptions::memory())
    }

    /// The path the database was opened with.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn is_closed(&self) -> bool {
        self.lock().db.is_null()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Handle> {
        self.inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error() -> Error {
        Error::connection(ConnectionErrorKind::Closed, "database is closed")
    }

    /// Run one statement with positional parameters, collecting every row.
    pub fn execute(&self, sql: &str, params: &[SqliteValue]) -> Result<ExecuteResult, Error> {
        let handle = self.lock();
        let db = handle.db;
        if db.is_null() {
            return Err(Self::closed_error());
        }

        // SAFETY: db is valid and stays open while `handle` is held, which
        // outlives the statement
        let Some(stmt) = (unsafe { Statement::prepare(db, sql)? }) else {
            return Ok(ExecuteResult::default());
        };
        stmt.bind_all(sql, params)?;

        // SAFETY: db is valid
        let total_before = unsafe { sys::sqlite3_total_changes64(db) };

        let column_count = stmt.column_count();
        let columns: Vec<String> = (0..column_count).map(|i| stmt.column_name(i)).collect();

        let mut rows = Vec::new();
        while stmt.step(sql)? {
            rows.push((0..column_count).map(|i| stmt.read_column(i)).collect());
        }

        let mut result = ExecuteResult {
            columns,
            rows,
            rows_affected: None,
            insert_id: None,
        };

        if stmt.is_readonly() {
            return Ok(result);
        }

        // SAFETY: db is valid
        let (total_after, rowid_after) =
            unsafe { (sys::sqlite3_total_changes64(db), sys::sqlite3_last_insert_rowid(db)) };

        // sqlite3_changes keeps the count of the last DML statement, so it
        // is only trusted when this statement changed something.
        let changed = if total_after > total_before {
            // SAFETY: db is valid
            u64::try_from(unsafe { sys::sqlite3_changes64(db) }).unwrap_or(0)
        } else {
            0
        };
        result.rows_affected = Some(changed);
        if changed > 0 {
            result.insert_id = Some(rowid_after);
        }

        Ok(result)
    }

    /// Run a script of one or more statements without parameters or rows.
    pub fn execute_batch(&self, sql: &str) -> Result<(), Error> {
        let handle = self.lock();
        if handle.db.is_null() {
            return Err(Self::closed_error());
        }
        // SAFETY: db is valid while the handle lock is held
        unsafe { ffi::exec(handle.db, sql) }
    }

    /// Close the database. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), Error> {
        let mut handle = self.lock();
        if handle.db.is_null() {
            return Ok(());
        }
        tracing::debug!(path = %self.inner.path, "closing SQLite database");
        handle.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlbridge_core::QueryErrorKind;

    fn memory() -> NativeDatabase {
        NativeDatabase::open_memory().expect("open in-memory database")
    }

    #[test]
    fn test_open_memory() {
        let db = memory();
        assert_eq!(db.path(), ":memory:");
        assert!(!db.is_closed());
    }

    #[test]
    fn test_path_joins_location() {
        let options = OpenOptions::new("app.db").location("/tmp/data");
        assert_eq!(options.path(), "/tmp/data/app.db");
        assert_eq!(OpenOptions::memory().location("/tmp").path(), ":memory:");
    }

    #[test]
    fn test_open_flags() {
        let flags = OpenFlags::default().to_sqlite_flags();
        assert_eq!(flags, sys::SQLITE_OPEN_READWRITE | sys::SQLITE_OPEN_CREATE);
        assert_eq!(OpenFlags::read_only().to_sqlite_flags(), sys::SQLITE_OPEN_READONLY);
    }

    #[test]
    fn test_debug_redacts_key() {
        let options = OpenOptions::new("x.db").encryption_key("hunter2");
        let debug = format!("{:?}", options);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_execute_reports_counts() {
        let db = memory();
        let create = db
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        assert_eq!(create.rows_affected, Some(0));
        assert_eq!(create.insert_id, None);

        let insert = db
            .execute(
                "INSERT INTO t (name) VALUES (?), (?)",
                &[SqliteValue::Text("a".into()), SqliteValue::Text("b".into())],
            )
            .unwrap();
        assert_eq!(insert.rows_affected, Some(2));
        assert_eq!(insert.insert_id, Some(2));

        let update = db
            .execute("UPDATE t SET name = 'c' WHERE id = 1", &[])
            .unwrap();
        assert_eq!(update.rows_affected, Some(1));
        // the connection's last insert rowid, unchanged by UPDATE
        assert_eq!(update.insert_id, Some(2));

        let select = db.execute("SELECT id, name FROM t ORDER BY id", &[]).unwrap();
        assert_eq!(select.columns, vec!["id", "name"]);
        assert_eq!(select.rows_affected, None);
        assert_eq!(select.insert_id, None);
        assert_eq!(
            select.rows,
            vec![
                vec![SqliteValue::Integer(1), SqliteValue::Text("c".into())],
                vec![SqliteValue::Integer(2), SqliteValue::Text("b".into())],
            ]
        );
    }

    #[test]
    fn test_insert_id_reported_when_rowid_is_reused() {
        let db = memory();
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
            .unwrap();

        let first = db.execute("INSERT INTO t (id, v) VALUES (1, 'a')", &[]).unwrap();
        assert_eq!(first.insert_id, Some(1));

        let replaced = db
            .execute("INSERT OR REPLACE INTO t (id, v) VALUES (1, 'b')", &[])
            .unwrap();
        assert_eq!(replaced.rows_affected, Some(1));
        assert_eq!(replaced.insert_id, Some(1));

        db.execute("DELETE FROM t WHERE id = 1", &[]).unwrap();
        let reinserted = db.execute("INSERT INTO t (id, v) VALUES (1, 'c')", &[]).unwrap();
        assert_eq!(reinserted.rows_affected, Some(1));
        assert_eq!(reinserted.insert_id, Some(1));

        let ignored = db
            .execute("INSERT OR IGNORE INTO t (id, v) VALUES (1, 'd')", &[])
            .unwrap();
        assert_eq!(ignored.rows_affected, Some(0));
        assert_eq!(ignored.insert_id, None);
    }

    #[test]
    fn test_busy_timeout_is_clamped() {
        let db = NativeDatabase::open(&OpenOptions::memory().busy_timeout(u32::MAX))
            .expect("open in-memory database");
        let timeout = db.execute("PRAGMA busy_timeout", &[]).unwrap();
        assert_eq!(timeout.rows, vec![vec![SqliteValue::Integer(i64::from(c_int::MAX))]]);

        let db = NativeDatabase::open(&OpenOptions::memory().busy_timeout(250)).unwrap();
        let timeout = db.execute("PRAGMA busy_timeout", &[]).unwrap();
        assert_eq!(timeout.rows, vec![vec![SqliteValue::Integer(250)]]);
    }

    #[test]
    fn test_oversized_parameter_is_too_big() {
        let db = memory();
        // SAFETY: the handle is open
        unsafe {
            sys::sqlite3_limit(db.lock().db, sys::SQLITE_LIMIT_LENGTH, 16);
        }
        let err = db
            .execute("SELECT ?", &[SqliteValue::Blob(vec![0; 64])])
            .unwrap_err();
        assert!(matches!(&err, Error::Query(q) if q.kind == QueryErrorKind::TooBig));
        assert_eq!(err.sql(), Some("SELECT ?"));

        let ok = db.execute("SELECT ?", &[SqliteValue::Text("short".into())]).unwrap();
        assert_eq!(ok.rows, vec![vec![SqliteValue::Text("short".into())]]);
    }

    #[test]
    fn test_storage_classes_round_trip() {
        let db = memory();
        let result = db
            .execute(
                "SELECT ?, ?, ?, ?, ?",
                &[
                    SqliteValue::Null,
                    SqliteValue::Integer(-7),
                    SqliteValue::Real(1.5),
                    SqliteValue::Text("héllo".into()),
                    SqliteValue::Blob(vec![0, 1, 2]),
                ],
            )
            .unwrap();
        let types: Vec<SqliteType> = result.rows[0].iter().map(SqliteValue::sqlite_type).collect();
        assert_eq!(
            types,
            vec![
                SqliteType::Null,
                SqliteType::Integer,
                SqliteType::Real,
                SqliteType::Text,
                SqliteType::Blob
            ]
        );
        assert_eq!(result.rows[0][3], SqliteValue::Text("héllo".into()));
    }

    #[test]
    fn test_empty_sql_is_a_no_op() {
        let db = memory();
        let result = db.execute("  -- nothing here\n", &[]).unwrap();
        assert!(result.rows.is_empty());
        assert!(result.columns.is_empty());
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let db = memory();
        let err = db.execute("SELECT 1; SELECT 2", &[]).unwrap_err();
        assert!(err.to_string().contains("one statement"));
        assert!(db.execute("SELECT 1;", &[]).is_ok());
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let db = memory();
        let err = db.execute("SELECT ?", &[]).unwrap_err();
        assert!(err.to_string().contains("expects 1 parameters"));
    }

    #[test]
    fn test_constraint_error_kind() {
        let db = memory();
        db.execute_batch("CREATE TABLE u (id INTEGER PRIMARY KEY); INSERT INTO u VALUES (1);")
            .unwrap();
        let err = db.execute("INSERT INTO u VALUES (1)", &[]).unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(err.sql(), Some("INSERT INTO u VALUES (1)"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let db = memory();
        let clone = db.clone();
        db.close().unwrap();
        db.close().unwrap();
        assert!(clone.is_closed());
        let err = clone.execute("SELECT 1", &[]).unwrap_err();
        assert!(err.is_closed());
        assert!(clone.execute_batch("SELECT 1").unwrap_err().is_closed());
    }

    #[test]
    fn test_open_missing_file_read_only_fails() {
        let dir = std::env::temp_dir().join("sqlbridge-native-missing");
        let options = OpenOptions::new("does-not-exist.db")
            .location(dir.to_string_lossy())
            .flags(OpenFlags::read_only());
        let err = NativeDatabase::open(&options).unwrap_err();
        assert!(err.to_string().contains("Failed to open database"));
    }

    #[test]
    fn test_file_database_persists() {
        let dir = std::env::temp_dir();
        let name = format!("sqlbridge-native-{}.db", std::process::id());
        let options = OpenOptions::new(name.as_str()).location(dir.to_string_lossy());
        let path = options.path();
        let _ = std::fs::remove_file(&path);

        let db = NativeDatabase::open(&options).unwrap();
        db.execute_batch("CREATE TABLE kv (k TEXT); INSERT INTO kv VALUES ('x');")
            .unwrap();
        db.close().unwrap();

        let reopened = NativeDatabase::open(&options).unwrap();
        let rows = reopened.execute("SELECT k FROM kv", &[]).unwrap().rows;
        assert_eq!(rows, vec![vec![SqliteValue::Text("x".into())]]);
        drop(reopened);
        let _ = std::fs::remove_file(&path);
    }
}
