//! SQLite dialect and driver for SQLBridge.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate connects the query layer to an embedded SQLite database
//! through `libsqlite3-sys`. A single native connection is shared by every
//! caller and serialized with a FIFO lock.
//!
//! # Features
//!
//! - Lazy, retryable driver initialization with `PRAGMA foreign_keys = ON`
//! - `STRICT` appended to `CREATE TABLE` statements
//! - Optional decoding of boolean, timestamp and JSON text on read
//! - Transactions bracketed by `BEGIN TRANSACTION` / `COMMIT` / `ROLLBACK`
//! - Error hook and statement logging
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlbridge_query::{Database, Query};
//! use sqlbridge_sqlite::{OpSqliteConfig, OpSqliteDialect};
//!
//! let db = Database::new(OpSqliteDialect::new(OpSqliteConfig::memory()));
//! let cx = Cx::for_testing();
//! db.execute(&cx, &Query::raw("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT)")).await;
//! db.execute(&cx, &Query::insert_into("person").values([("name", "Ann".into())])).await;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Null` | NULL |
//! | `Bool` | TEXT (`"true"` / `"false"`) |
//! | `Integer` | INTEGER |
//! | `Real` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Timestamp` | TEXT (ISO-8601 UTC, milliseconds) |
//! | `Json` | TEXT |

pub mod affinity;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod driver;
pub mod ffi;
pub mod mutex;
pub mod native;

pub use codec::{deserialize, deserialize_row, deserialize_rows, serialize, serialize_params};
pub use config::{DatabaseSource, ErrorHook, OpSqliteConfig};
pub use connection::{OpSqliteConnection, append_strict_mode};
pub use dialect::{OpSqliteDialect, OpSqliteDialectConfig};
pub use driver::{OpSqliteDriver, OpSqliteLease};
pub use mutex::{ConnectionGuard, ConnectionMutex};
pub use native::{ExecuteResult, NativeDatabase, OpenFlags, OpenOptions, SqliteType, SqliteValue};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
