//! SQLite dialect backed by [`OpSqliteDriver`].

use crate::config::OpSqliteConfig;
use crate::driver::OpSqliteDriver;
use sqlbridge_core::{Dialect, QueryExecutor};
use sqlbridge_query::{SqliteAdapter, SqliteIntrospector, SqliteQueryCompiler};

/// Configuration accepted by [`OpSqliteDialect`].
pub type OpSqliteDialectConfig = OpSqliteConfig;

/// Dialect pairing the single-connection driver with the shared SQLite
/// compiler, adapter and introspector.
#[derive(Debug, Clone, Default)]
pub struct OpSqliteDialect {
    config: OpSqliteDialectConfig,
}

impl OpSqliteDialect {
    pub fn new(config: OpSqliteDialectConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OpSqliteDialectConfig {
        &self.config
    }
}

impl Dialect for OpSqliteDialect {
    type Driver = OpSqliteDriver;
    type Compiler = SqliteQueryCompiler;
    type Adapter = SqliteAdapter;
    type Introspector<E: QueryExecutor + 'static> = SqliteIntrospector<E>;

    fn create_driver(&self) -> OpSqliteDriver {
        OpSqliteDriver::new(self.config.clone())
    }

    fn create_query_compiler(&self) -> SqliteQueryCompiler {
        SqliteQueryCompiler::new()
    }

    fn create_adapter(&self) -> SqliteAdapter {
        SqliteAdapter::new()
    }

    fn create_introspector<E: QueryExecutor + 'static>(&self, executor: E) -> SqliteIntrospector<E> {
        SqliteIntrospector::new(executor)
    }
}
