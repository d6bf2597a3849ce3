//! Dialect contract: the set of components a database flavour supplies.
//!
//! A [`Dialect`] is a factory for a [`Driver`], a [`QueryCompiler`], a
//! [`DialectAdapter`] and a [`DatabaseIntrospector`]. The database handle
//! asks the dialect for each piece once and then talks to the pieces only.

use crate::ast::QueryNode;
use crate::connection::{Driver, QueryExecutor};
use crate::error::{Error, Result};
use crate::query::CompiledQuery;
use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};

/// Default name of the migration bookkeeping table.
pub const DEFAULT_MIGRATION_TABLE: &str = "sqlbridge_migration";

/// Default name of the migration lock table.
pub const DEFAULT_MIGRATION_LOCK_TABLE: &str = "sqlbridge_migration_lock";

/// Turns operation nodes into SQL text plus ordered parameters.
pub trait QueryCompiler: Send + Sync {
    fn compile(&self, node: &QueryNode) -> Result<CompiledQuery>;
}

/// Where the migration lock lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationLockOptions {
    pub lock_table: String,
    pub lock_row_id: String,
    pub lock_table_schema: Option<String>,
}

impl Default for MigrationLockOptions {
    fn default() -> Self {
        Self {
            lock_table: DEFAULT_MIGRATION_LOCK_TABLE.to_string(),
            lock_row_id: "migration_lock".to_string(),
            lock_table_schema: None,
        }
    }
}

/// Dialect capabilities and migration locking.
pub trait DialectAdapter: Send + Sync {
    /// Whether DDL statements can be rolled back inside a transaction.
    fn supports_transactional_ddl(&self) -> bool;

    /// Whether `RETURNING` clauses are understood.
    fn supports_returning(&self) -> bool;

    /// Take the migration lock before running migrations.
    fn acquire_migration_lock<E: QueryExecutor>(
        &self,
        cx: &Cx,
        executor: &E,
        options: &MigrationLockOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn release_migration_lock<E: QueryExecutor>(
        &self,
        cx: &Cx,
        executor: &E,
        options: &MigrationLockOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// Options for schema introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntrospectOptions {
    /// Include the migration bookkeeping tables in the result.
    pub with_internal_migration_tables: bool,
}

/// One column of a table or view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Declared type as written in the schema, e.g. `INTEGER`, `TEXT`
    pub data_type: String,
    pub is_nullable: bool,
    pub is_autoincrementing: bool,
    pub has_default_value: bool,
    pub comment: Option<String>,
}

/// A table or view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub is_view: bool,
    pub schema: Option<String>,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub tables: Vec<TableMetadata>,
}

/// Reads schema information out of a live database.
pub trait DatabaseIntrospector: Send + Sync {
    fn get_schemas(&self, cx: &Cx) -> impl Future<Output = Outcome<Vec<SchemaMetadata>, Error>> + Send;

    fn get_tables(
        &self,
        cx: &Cx,
        options: IntrospectOptions,
    ) -> impl Future<Output = Outcome<Vec<TableMetadata>, Error>> + Send;

    fn get_metadata(
        &self,
        cx: &Cx,
        options: IntrospectOptions,
    ) -> impl Future<Output = Outcome<DatabaseMetadata, Error>> + Send;
}

/// Factory for every component a database flavour needs.
pub trait Dialect: Send + Sync + 'static {
    type Driver: Driver + 'static;
    type Compiler: QueryCompiler + 'static;
    type Adapter: DialectAdapter + 'static;
    type Introspector<E: QueryExecutor + 'static>: DatabaseIntrospector;

    fn create_driver(&self) -> Self::Driver;

    fn create_query_compiler(&self) -> Self::Compiler;

    fn create_adapter(&self) -> Self::Adapter;

    /// Build an introspector that queries through `executor`.
    fn create_introspector<E: QueryExecutor + 'static>(&self, executor: E) -> Self::Introspector<E>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_lock_defaults() {
        let options = MigrationLockOptions::default();
        assert_eq!(options.lock_table, DEFAULT_MIGRATION_LOCK_TABLE);
        assert_eq!(options.lock_row_id, "migration_lock");
        assert!(options.lock_table_schema.is_none());
    }

    #[test]
    fn table_column_lookup() {
        let table = TableMetadata {
            name: "person".into(),
            is_view: false,
            schema: None,
            columns: vec![ColumnMetadata {
                name: "id".into(),
                data_type: "INTEGER".into(),
                is_nullable: false,
                is_autoincrementing: true,
                has_default_value: false,
                comment: None,
            }],
        };
        assert!(table.column("id").is_some_and(|c| c.is_autoincrementing));
        assert!(table.column("missing").is_none());
    }
}
