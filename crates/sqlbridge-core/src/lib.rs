//! Core types and traits for SQLBridge.
//!
//! This crate defines the contract that drivers and dialects plug into:
//!
//! - `Value` and `Row` for parameters and results
//! - `CompiledQuery` / `QueryResult` crossing the driver boundary
//! - `DatabaseConnection` and `Driver` for executing statements
//! - `Dialect` and its components (compiler, adapter, introspector)
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

pub use asupersync::{Cx, Outcome};

pub mod ast;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod query;
pub mod row;
pub mod value;

pub use ast::{
    BinaryOp, DeleteNode, Expr, InsertNode, OrderBy, OrderDirection, QueryNode, RawNode,
    SelectNode, UpdateNode,
};
pub use connection::{DatabaseConnection, Driver, QueryExecutor};
pub use dialect::{
    ColumnMetadata, DEFAULT_MIGRATION_LOCK_TABLE, DEFAULT_MIGRATION_TABLE, DatabaseIntrospector,
    DatabaseMetadata, Dialect, DialectAdapter, IntrospectOptions, MigrationLockOptions,
    QueryCompiler, SchemaMetadata, TableMetadata,
};
pub use error::{
    ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result,
    TransactionError, TransactionErrorKind, TypeError,
};
pub use query::{CompiledQuery, QueryKind, QueryResult};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
