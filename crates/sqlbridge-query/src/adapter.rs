//! SQLite dialect adapter.

use asupersync::{Cx, Outcome};
use sqlbridge_core::{DialectAdapter, Error, MigrationLockOptions, QueryExecutor};

/// Capabilities of SQLite as seen by the query layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAdapter;

impl SqliteAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl DialectAdapter for SqliteAdapter {
    fn supports_transactional_ddl(&self) -> bool {
        false
    }

    fn supports_returning(&self) -> bool {
        true
    }

    // The single connection stays reserved by the migrator between acquire
    // and release, so there is nothing to lock.
    fn acquire_migration_lock<E: QueryExecutor>(
        &self,
        _cx: &Cx,
        _executor: &E,
        options: &MigrationLockOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        tracing::trace!(lock_table = %options.lock_table, "migration lock acquire is a no-op on SQLite");
        async { Outcome::Ok(()) }
    }

    fn release_migration_lock<E: QueryExecutor>(
        &self,
        _cx: &Cx,
        _executor: &E,
        options: &MigrationLockOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        tracing::trace!(lock_table = %options.lock_table, "migration lock release is a no-op on SQLite");
        async { Outcome::Ok(()) }
    }
}
