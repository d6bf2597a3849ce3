//! Single-connection driver.
//!
//! The driver owns one native handle, opened lazily on first use. Every
//! caller acquires it through a FIFO [`ConnectionMutex`], receiving an
//! [`OpSqliteLease`] that releases the lock when handed back or dropped.

// Allow `impl Future` return types in trait methods
#![allow(clippy::manual_async_fn)]

use crate::config::{DatabaseSource, OpSqliteConfig};
use crate::connection::OpSqliteConnection;
use crate::mutex::{ConnectionGuard, ConnectionMutex};
use crate::native::NativeDatabase;
use asupersync::{Cx, Outcome};
use sqlbridge_core::{
    CompiledQuery, ConnectionErrorKind, DatabaseConnection, Driver, Error, QueryResult,
};
use std::sync::{Mutex, MutexGuard, PoisonError};

const BEGIN: &str = "BEGIN TRANSACTION";
const COMMIT: &str = "COMMIT";
const ROLLBACK: &str = "ROLLBACK";

/// Exclusive use of the driver's connection.
///
/// Dropping a lease whose transaction is still open rolls the transaction
/// back before the lock is released.
pub struct OpSqliteLease {
    connection: OpSqliteConnection,
    in_transaction: bool,
    // Declared last so it is released after the rollback in `drop`.
    _guard: Option<ConnectionGuard>,
}

impl std::fmt::Debug for OpSqliteLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpSqliteLease")
            .field("connection", &self.connection)
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl OpSqliteLease {
    pub fn connection(&self) -> &OpSqliteConnection {
        &self.connection
    }

    /// Whether a transaction begun on this lease is still open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn run_marker(&self, sql: &'static str) -> Result<QueryResult, Error> {
        tracing::debug!(statement = sql, "transaction marker");
        self.connection.execute_sync(&CompiledQuery::raw(sql, Vec::new()))
    }
}

impl DatabaseConnection for OpSqliteLease {
    fn execute_query(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        self.connection.execute_query(cx, query)
    }

    fn stream_query(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
        chunk_size: usize,
    ) -> impl Future<Output = Outcome<Vec<QueryResult>, Error>> + Send {
        self.connection.stream_query(cx, query, chunk_size)
    }
}

impl Drop for OpSqliteLease {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        tracing::warn!("connection released with an open transaction, rolling back");
        if let Err(e) = self.run_marker(ROLLBACK) {
            tracing::warn!(error = %e, "rollback of abandoned transaction failed");
        }
    }
}

#[derive(Default)]
struct DriverState {
    connection: Option<OpSqliteConnection>,
}

/// Driver over a single SQLite connection.
pub struct OpSqliteDriver {
    config: OpSqliteConfig,
    state: Mutex<DriverState>,
    mutex: ConnectionMutex,
}

impl std::fmt::Debug for OpSqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpSqliteDriver")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .field("mutex", &self.mutex)
            .finish()
    }
}

impl OpSqliteDriver {
    /// Create a driver. Nothing is opened until first use.
    pub fn new(config: OpSqliteConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DriverState::default()),
            mutex: ConnectionMutex::new(),
        }
    }

    pub fn config(&self) -> &OpSqliteConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().connection.is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_database(&self) -> Result<NativeDatabase, Error> {
        match &self.config.database {
            DatabaseSource::Existing(db) => {
                if db.is_closed() {
                    return Err(Error::connection(
                        ConnectionErrorKind::Closed,
                        "the adopted database handle has been closed",
                    ));
                }
                Ok(db.clone())
            }
            DatabaseSource::Open(options) => NativeDatabase::open(options),
        }
    }

    /// Return the connection, opening it first if needed.
    ///
    /// A failed attempt leaves the driver uninitialized so the next call
    /// tries again.
    fn ensure_initialized(&self) -> Result<OpSqliteConnection, Error> {
        let mut state = self.lock_state();
        if let Some(connection) = &state.connection {
            tracing::trace!("reusing initialized SQLite connection");
            return Ok(connection.clone());
        }

        let db = self.open_database()?;
        let connection = OpSqliteConnection::new(db)
            .auto_affinity_conversion(self.config.auto_affinity_conversion)
            .disable_strict_mode_create_table(self.config.disable_strict_mode_create_table)
            .debug(self.config.debug)
            .on_error(self.config.on_error.clone());

        if !self.config.disable_foreign_keys {
            connection.execute_sync(&CompiledQuery::raw("PRAGMA foreign_keys = ON", Vec::new()))?;
        }

        tracing::info!(path = %connection.database().path(), "SQLite driver initialized");
        state.connection = Some(connection.clone());
        Ok(connection)
    }
}

impl Driver for OpSqliteDriver {
    type Connection = OpSqliteLease;

    fn init(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.ensure_initialized().map(|_| ());
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn acquire_connection(
        &self,
        cx: &Cx,
    ) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send {
        async move {
            if let Some(reason) = cx.cancel_reason() {
                return Outcome::Cancelled(reason);
            }
            let connection = match self.ensure_initialized() {
                Ok(connection) => connection,
                Err(e) => return Outcome::Err(e),
            };
            let guard = if self.config.disable_mutex {
                None
            } else {
                match self.mutex.lock(cx).await {
                    Outcome::Ok(guard) => Some(guard),
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            };
            tracing::debug!("acquired SQLite connection");
            Outcome::Ok(OpSqliteLease {
                connection,
                in_transaction: false,
                _guard: guard,
            })
        }
    }

    fn begin_transaction(
        &self,
        _cx: &Cx,
        connection: &mut Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = connection.run_marker(BEGIN).map(|_| {
            connection.in_transaction = true;
        });
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn commit_transaction(
        &self,
        _cx: &Cx,
        connection: &mut Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        // A failed COMMIT leaves the transaction open, so the flag stays set.
        let result = connection.run_marker(COMMIT).map(|_| {
            connection.in_transaction = false;
        });
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn rollback_transaction(
        &self,
        _cx: &Cx,
        connection: &mut Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = connection.run_marker(ROLLBACK).map(|_| ());
        connection.in_transaction = false;
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn release_connection(
        &self,
        _cx: &Cx,
        connection: Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        drop(connection);
        tracing::debug!("released SQLite connection");
        async { Outcome::Ok(()) }
    }

    fn destroy(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let connection = self.lock_state().connection.take();
        let result = match connection {
            Some(connection) => {
                tracing::info!(path = %connection.database().path(), "closing SQLite driver");
                connection.database().close()
            }
            None => Ok(()),
        };
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::OpenOptions;
    use asupersync::runtime::RuntimeBuilder;
    use sqlbridge_core::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll, Waker};

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn scalar(result: &QueryResult) -> Value {
        result
            .first()
            .and_then(|row| row.get(0))
            .cloned()
            .unwrap_or(Value::Null)
    }

    #[test]
    fn new_does_no_io() {
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory());
        assert!(!driver.is_initialized());
    }

    #[test]
    fn init_is_memoised_and_enables_foreign_keys() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory());

        rt.block_on(async {
            unwrap_outcome(driver.init(&cx).await);
            unwrap_outcome(driver.init(&cx).await);
            assert!(driver.is_initialized());

            let lease = unwrap_outcome(driver.acquire_connection(&cx).await);
            let fk = unwrap_outcome(
                lease
                    .execute_query(&cx, &CompiledQuery::raw("PRAGMA foreign_keys", vec![]))
                    .await,
            );
            assert_eq!(scalar(&fk), Value::Integer(1));
            unwrap_outcome(driver.release_connection(&cx, lease).await);
        });
    }

    #[test]
    fn foreign_keys_can_stay_off() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory().disable_foreign_keys(true));

        rt.block_on(async {
            let lease = unwrap_outcome(driver.acquire_connection(&cx).await);
            let fk = unwrap_outcome(
                lease
                    .execute_query(&cx, &CompiledQuery::raw("PRAGMA foreign_keys", vec![]))
                    .await,
            );
            assert_eq!(scalar(&fk), Value::Integer(0));
        });
    }

    #[test]
    fn failed_init_is_retried() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = NativeDatabase::open_memory().unwrap();
        db.close().unwrap();
        let driver = OpSqliteDriver::new(OpSqliteConfig::existing(db));

        rt.block_on(async {
            for _ in 0..2 {
                match driver.init(&cx).await {
                    Outcome::Err(e) => assert!(e.is_closed()),
                    _ => panic!("init of a closed handle should fail"),
                }
                assert!(!driver.is_initialized());
            }
        });
    }

    #[test]
    fn open_failure_reports_connect_error() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let options = OpenOptions::new("missing.db")
            .location("/nonexistent/sqlbridge")
            .flags(crate::native::OpenFlags::read_only());
        let driver = OpSqliteDriver::new(OpSqliteConfig::open(options));

        rt.block_on(async {
            match driver.acquire_connection(&cx).await {
                Outcome::Err(e) => assert!(e.to_string().contains("Failed to open database")),
                _ => panic!("opening a missing read-only file should fail"),
            }
        });
    }

    #[test]
    fn transaction_markers_and_commit() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory());

        rt.block_on(async {
            let mut lease = unwrap_outcome(driver.acquire_connection(&cx).await);
            unwrap_outcome(
                lease
                    .execute_query(&cx, &CompiledQuery::raw("CREATE TABLE t (v INTEGER)", vec![]))
                    .await,
            );

            unwrap_outcome(driver.begin_transaction(&cx, &mut lease).await);
            assert!(lease.in_transaction());
            unwrap_outcome(
                lease
                    .execute_query(
                        &cx,
                        &CompiledQuery::raw("INSERT INTO t VALUES (?)", vec![Value::Integer(1)]),
                    )
                    .await,
            );
            unwrap_outcome(driver.commit_transaction(&cx, &mut lease).await);
            assert!(!lease.in_transaction());

            unwrap_outcome(driver.begin_transaction(&cx, &mut lease).await);
            unwrap_outcome(
                lease
                    .execute_query(
                        &cx,
                        &CompiledQuery::raw("INSERT INTO t VALUES (?)", vec![Value::Integer(2)]),
                    )
                    .await,
            );
            unwrap_outcome(driver.rollback_transaction(&cx, &mut lease).await);

            let count = unwrap_outcome(
                lease
                    .execute_query(&cx, &CompiledQuery::raw("SELECT count(*) FROM t", vec![]))
                    .await,
            );
            assert_eq!(scalar(&count), Value::Integer(1));
        });
    }

    #[test]
    fn dropped_lease_rolls_back_open_transaction() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory());

        rt.block_on(async {
            let mut lease = unwrap_outcome(driver.acquire_connection(&cx).await);
            unwrap_outcome(
                lease
                    .execute_query(&cx, &CompiledQuery::raw("CREATE TABLE t (v INTEGER)", vec![]))
                    .await,
            );
            unwrap_outcome(driver.begin_transaction(&cx, &mut lease).await);
            unwrap_outcome(
                lease
                    .execute_query(&cx, &CompiledQuery::raw("INSERT INTO t VALUES (1)", vec![]))
                    .await,
            );
            drop(lease);

            let lease = unwrap_outcome(driver.acquire_connection(&cx).await);
            let count = unwrap_outcome(
                lease
                    .execute_query(&cx, &CompiledQuery::raw("SELECT count(*) FROM t", vec![]))
                    .await,
            );
            assert_eq!(scalar(&count), Value::Integer(0));
        });
    }

    #[test]
    fn markers_go_through_the_error_hook() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory().on_error(move |msg, _| {
            assert_eq!(msg, "Query failed: COMMIT");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        rt.block_on(async {
            let mut lease = unwrap_outcome(driver.acquire_connection(&cx).await);
            assert!(matches!(
                driver.commit_transaction(&cx, &mut lease).await,
                Outcome::Err(_)
            ));
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lease_holds_the_lock_until_released() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory());

        rt.block_on(async {
            let lease = unwrap_outcome(driver.acquire_connection(&cx).await);
            assert!(driver.mutex.is_locked());
            unwrap_outcome(driver.release_connection(&cx, lease).await);
            assert!(!driver.mutex.is_locked());
        });
    }

    #[test]
    fn cancelled_context_is_refused_a_lease() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        cx.set_cancel_requested(true);
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory());

        rt.block_on(async {
            assert!(matches!(
                driver.acquire_connection(&cx).await,
                Outcome::Cancelled(_)
            ));
        });
        assert!(!driver.mutex.is_locked());
        assert_eq!(driver.mutex.waiters(), 0);
    }

    #[test]
    fn cancelled_while_waiting_for_the_lease() {
        let cx = Cx::for_testing();
        let cancelled = Cx::for_testing();
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory());
        let mut task = Context::from_waker(Waker::noop());

        let mut first = Box::pin(driver.acquire_connection(&cx));
        let Poll::Ready(first) = first.as_mut().poll(&mut task) else {
            panic!("uncontended acquire should not wait");
        };
        let first = unwrap_outcome(first);

        let mut waiting = Box::pin(driver.acquire_connection(&cancelled));
        let mut behind = Box::pin(driver.acquire_connection(&cx));
        assert!(waiting.as_mut().poll(&mut task).is_pending());
        assert!(behind.as_mut().poll(&mut task).is_pending());

        cancelled.set_cancel_requested(true);
        assert!(matches!(
            waiting.as_mut().poll(&mut task),
            Poll::Ready(Outcome::Cancelled(_))
        ));
        assert!(driver.mutex.is_locked());

        drop(first);
        let Poll::Ready(second) = behind.as_mut().poll(&mut task) else {
            panic!("the remaining waiter should get the lease");
        };
        drop(unwrap_outcome(second));
        assert!(!driver.mutex.is_locked());
    }

    #[test]
    fn disable_mutex_skips_locking() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory().disable_mutex(true));

        rt.block_on(async {
            let first = unwrap_outcome(driver.acquire_connection(&cx).await);
            let second = unwrap_outcome(driver.acquire_connection(&cx).await);
            assert!(!driver.mutex.is_locked());
            drop(first);
            drop(second);
        });
    }

    #[test]
    fn destroy_resets_and_reopens() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let driver = OpSqliteDriver::new(OpSqliteConfig::memory());

        rt.block_on(async {
            // destroying an uninitialized driver is a no-op
            unwrap_outcome(driver.destroy(&cx).await);

            let lease = unwrap_outcome(driver.acquire_connection(&cx).await);
            let db = lease.connection().database().clone();
            unwrap_outcome(
                lease
                    .execute_query(&cx, &CompiledQuery::raw("CREATE TABLE t (v INTEGER)", vec![]))
                    .await,
            );
            drop(lease);

            unwrap_outcome(driver.destroy(&cx).await);
            assert!(!driver.is_initialized());
            assert!(db.is_closed());

            // a fresh in-memory database has no tables
            let lease = unwrap_outcome(driver.acquire_connection(&cx).await);
            let tables = unwrap_outcome(
                lease
                    .execute_query(
                        &cx,
                        &CompiledQuery::raw(
                            "SELECT count(*) FROM sqlite_master WHERE name = 't'",
                            vec![],
                        ),
                    )
                    .await,
            );
            assert_eq!(scalar(&tables), Value::Integer(0));
        });
    }

    #[test]
    fn destroy_closes_adopted_handle() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = NativeDatabase::open_memory().unwrap();
        let driver = OpSqliteDriver::new(OpSqliteConfig::existing(db.clone()));

        rt.block_on(async {
            unwrap_outcome(driver.init(&cx).await);
            unwrap_outcome(driver.destroy(&cx).await);
        });
        assert!(db.is_closed());
    }
}
