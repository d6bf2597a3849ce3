//! SQLBridge: an embedded SQLite dialect for a pluggable query layer.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlbridge::prelude::*;
//!
//! async fn example(cx: &Cx) {
//!     let db = Database::new(OpSqliteDialect::new(
//!         OpSqliteConfig::open(OpenOptions::new("app.db")).auto_affinity_conversion(true),
//!     ));
//!
//!     db.execute(cx, &Query::raw(
//!         "CREATE TABLE person (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, vip TEXT)",
//!     )).await;
//!
//!     let inserted = db
//!         .execute(cx, &Query::insert_into("person")
//!             .values([("name", Value::from("Ann")), ("vip", Value::from(true))]))
//!         .await;
//!
//!     let adults = db
//!         .execute(cx, &Query::select("person")
//!             .filter(Expr::col("vip").eq(true))
//!             .order_by(OrderBy::asc("name")))
//!         .await;
//! }
//! ```
//!
//! # Crates
//!
//! - `sqlbridge-core`: values, rows, errors and the driver/dialect traits
//! - `sqlbridge-query`: builders, the SQLite compiler, adapter and
//!   introspector, and the `Database` handle
//! - `sqlbridge-sqlite`: the native binding, codec, connection lock and driver
//! - `sqlbridge-provider`: application-scope provider and hooks

pub use sqlbridge_core::{
    ColumnInfo, ColumnMetadata, CompiledQuery, ConnectionErrorKind, Cx,
    DEFAULT_MIGRATION_LOCK_TABLE, DEFAULT_MIGRATION_TABLE, DatabaseConnection,
    DatabaseIntrospector, DatabaseMetadata, Dialect, DialectAdapter, Driver, Error, FromValue,
    IntrospectOptions, MigrationLockOptions, Outcome, QueryCompiler, QueryErrorKind,
    QueryExecutor, QueryKind, QueryResult, Result, Row, SchemaMetadata, TableMetadata,
    TransactionErrorKind, Value,
};

pub use sqlbridge_query::{
    Database, DeleteBuilder, Expr, InsertBuilder, OrderBy, OrderDirection, Query, RawBuilder,
    SelectBuilder, SqliteAdapter, SqliteIntrospector, SqliteQueryCompiler, ToQueryNode,
    Transaction, UpdateBuilder,
};

pub use sqlbridge_sqlite::{
    ConnectionMutex, DatabaseSource, ErrorHook, NativeDatabase, OpSqliteConfig,
    OpSqliteConnection, OpSqliteDialect, OpSqliteDialectConfig, OpSqliteDriver, OpenFlags,
    OpenOptions, SqliteType, SqliteValue, sqlite_version,
};

pub use sqlbridge_provider::{
    DatabaseContext, DatabaseProvider, ProviderError, ProviderProps, ProviderScope,
    SqliteDatabase, use_database, use_database_context,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sqlbridge::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // asupersync
        Cx,
        Outcome,
        // Core types
        Error,
        Result,
        Row,
        Value,
        // Query building
        Database,
        Expr,
        OrderBy,
        Query,
        Transaction,
        // SQLite
        OpSqliteConfig,
        OpSqliteDialect,
        OpenOptions,
        // Provider
        DatabaseProvider,
        ProviderProps,
        use_database,
        use_database_context,
    };
}
