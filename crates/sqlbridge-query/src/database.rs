//! The database handle applications execute queries through.

use crate::builder::ToQueryNode;
use asupersync::{Cx, Outcome};
use sqlbridge_core::{
    CompiledQuery, DatabaseConnection, Dialect, Driver, Error, QueryCompiler, QueryExecutor,
    QueryResult, Result, TransactionError, TransactionErrorKind,
};
use std::sync::Arc;

struct DatabaseInner<D: Dialect> {
    dialect: D,
    driver: D::Driver,
    compiler: D::Compiler,
    adapter: D::Adapter,
}

/// Cheap-to-clone handle over one dialect's driver, compiler and adapter.
///
/// Every execution acquires a connection from the driver, runs the
/// statement and releases the connection again, also when the statement
/// fails.
pub struct Database<D: Dialect> {
    inner: Arc<DatabaseInner<D>>,
}

impl<D: Dialect> Clone for Database<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Dialect> std::fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &std::any::type_name::<D>())
            .finish_non_exhaustive()
    }
}

impl<D: Dialect> Database<D> {
    /// Build the handle. No I/O happens until the first execution.
    pub fn new(dialect: D) -> Self {
        let driver = dialect.create_driver();
        let compiler = dialect.create_query_compiler();
        let adapter = dialect.create_adapter();
        Self {
            inner: Arc::new(DatabaseInner {
                dialect,
                driver,
                compiler,
                adapter,
            }),
        }
    }

    pub fn dialect(&self) -> &D {
        &self.inner.dialect
    }

    pub fn driver(&self) -> &D::Driver {
        &self.inner.driver
    }

    pub fn adapter(&self) -> &D::Adapter {
        &self.inner.adapter
    }

    /// Compile a builder without executing it.
    pub fn compile(&self, query: &impl ToQueryNode) -> Result<CompiledQuery> {
        self.inner.compiler.compile(&query.to_query_node())
    }

    /// Compile and execute a builder.
    #[tracing::instrument(level = "debug", skip(self, cx, query))]
    pub async fn execute(&self, cx: &Cx, query: &(impl ToQueryNode + Sync)) -> Outcome<QueryResult, Error> {
        match self.compile(query) {
            Ok(compiled) => self.execute_compiled(cx, &compiled).await,
            Err(e) => Outcome::Err(e),
        }
    }

    /// Execute an already compiled statement.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(sql = %query.sql))]
    pub async fn execute_compiled(&self, cx: &Cx, query: &CompiledQuery) -> Outcome<QueryResult, Error> {
        let driver = &self.inner.driver;
        let connection = match driver.acquire_connection(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let result = connection.execute_query(cx, query).await;

        match driver.release_connection(cx, connection).await {
            Outcome::Ok(()) => result,
            Outcome::Err(e) => {
                if let Outcome::Ok(_) = result {
                    Outcome::Err(e)
                } else {
                    tracing::warn!(error = %e, "failed to release connection after failed statement");
                    result
                }
            }
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Acquire a connection and open a transaction on it.
    ///
    /// The connection stays reserved for the transaction until it is
    /// committed or rolled back.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn begin(&self, cx: &Cx) -> Outcome<Transaction<D>, Error> {
        let driver = &self.inner.driver;
        let mut connection = match driver.acquire_connection(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        match driver.begin_transaction(cx, &mut connection).await {
            Outcome::Ok(()) => Outcome::Ok(Transaction {
                db: self.clone(),
                connection: Some(connection),
            }),
            Outcome::Err(e) => {
                release_quietly(driver, cx, connection).await;
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                release_quietly(driver, cx, connection).await;
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                release_quietly(driver, cx, connection).await;
                Outcome::Panicked(p)
            }
        }
    }

    /// Schema introspection running through this handle.
    pub fn introspection(&self) -> D::Introspector<Database<D>> {
        self.inner.dialect.create_introspector(self.clone())
    }

    /// Tear down the driver. Clones share the driver, so this affects all
    /// of them; a later execution initializes it again.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn destroy(&self, cx: &Cx) -> Outcome<(), Error> {
        self.inner.driver.destroy(cx).await
    }
}

impl<D: Dialect> QueryExecutor for Database<D> {
    fn execute_compiled(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        Database::execute_compiled(self, cx, query)
    }
}

type ConnectionOf<D> = <<D as Dialect>::Driver as Driver>::Connection;

/// An open transaction holding its connection.
///
/// Finish it with [`Transaction::commit`] or [`Transaction::rollback`].
/// Dropping it unfinished drops the connection without going through the
/// driver; drivers whose connections roll back on drop keep the database
/// consistent, others leave the transaction open.
pub struct Transaction<D: Dialect> {
    db: Database<D>,
    connection: Option<ConnectionOf<D>>,
}

impl<D: Dialect> Transaction<D> {
    fn connection(&self) -> Result<&ConnectionOf<D>> {
        self.connection.as_ref().ok_or_else(finished)
    }

    /// Compile and execute a builder inside the transaction.
    pub async fn execute(&self, cx: &Cx, query: &(impl ToQueryNode + Sync)) -> Outcome<QueryResult, Error> {
        match self.db.compile(query) {
            Ok(compiled) => self.execute_compiled(cx, &compiled).await,
            Err(e) => Outcome::Err(e),
        }
    }

    pub async fn execute_compiled(&self, cx: &Cx, query: &CompiledQuery) -> Outcome<QueryResult, Error> {
        match self.connection() {
            Ok(connection) => connection.execute_query(cx, query).await,
            Err(e) => Outcome::Err(e),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn commit(mut self, cx: &Cx) -> Outcome<(), Error> {
        let Some(mut connection) = self.connection.take() else {
            return Outcome::Err(finished());
        };
        let driver = self.db.driver();
        let result = driver.commit_transaction(cx, &mut connection).await;
        if let Outcome::Err(e) = &result {
            tracing::warn!(error = %e, "COMMIT failed");
        }
        Self::release(driver, cx, connection, result).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn rollback(mut self, cx: &Cx) -> Outcome<(), Error> {
        let Some(mut connection) = self.connection.take() else {
            return Outcome::Err(finished());
        };
        let driver = self.db.driver();
        let result = driver.rollback_transaction(cx, &mut connection).await;
        Self::release(driver, cx, connection, result).await
    }

    async fn release(
        driver: &D::Driver,
        cx: &Cx,
        connection: ConnectionOf<D>,
        result: Outcome<(), Error>,
    ) -> Outcome<(), Error> {
        match driver.release_connection(cx, connection).await {
            Outcome::Ok(()) => result,
            Outcome::Err(e) if matches!(result, Outcome::Ok(())) => Outcome::Err(e),
            Outcome::Err(e) => {
                tracing::warn!(error = %e, "failed to release connection");
                result
            }
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl<D: Dialect> Drop for Transaction<D> {
    fn drop(&mut self) {
        if self.connection.is_some() {
            tracing::warn!("transaction dropped without commit or rollback");
        }
    }
}

async fn release_quietly<Dr: Driver>(driver: &Dr, cx: &Cx, connection: Dr::Connection) {
    if let Outcome::Err(e) = driver.release_connection(cx, connection).await {
        tracing::warn!(error = %e, "failed to release connection after failed BEGIN");
    }
}

fn finished() -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::AlreadyFinished,
        message: "transaction already committed or rolled back".to_string(),
    })
}
