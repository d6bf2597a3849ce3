//! Query construction and execution layer for SQLBridge.
//!
//! `sqlbridge-query` sits between application code and a dialect:
//!
//! - **Builders**: `Query::select`, `insert_into`, `update`, `delete_from`
//!   and `raw` assemble operation nodes, with `Expr` for WHERE clauses.
//! - **SQLite components**: `SqliteQueryCompiler`, `SqliteAdapter` and
//!   `SqliteIntrospector` are shared by every SQLite-backed dialect.
//! - **Execution**: `Database` owns a dialect's driver and compiler and runs
//!   statements and transactions through it.

pub mod adapter;
pub mod builder;
pub mod compiler;
pub mod database;
pub mod introspect;

pub use adapter::SqliteAdapter;
pub use builder::{
    DeleteBuilder, InsertBuilder, Query, RawBuilder, SelectBuilder, ToQueryNode, UpdateBuilder,
};
pub use compiler::{SqliteQueryCompiler, quote_identifier};
pub use database::{Database, Transaction};
pub use introspect::{SqliteIntrospector, autoincrement_column};
pub use sqlbridge_core::{Expr, OrderBy, OrderDirection};
