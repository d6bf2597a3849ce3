//! Connection and driver traits.
//!
//! - [`DatabaseConnection`] - executes compiled statements
//! - [`Driver`] - owns the physical connection(s) and hands them out
//! - [`QueryExecutor`] - anything that can run a compiled statement end to end
//!
//! All operations take a `Cx` context so cancellation flows through
//! asupersync's structured concurrency.

use crate::error::Error;
use crate::query::{CompiledQuery, QueryResult};
use asupersync::{Cx, Outcome};

/// A connection capable of executing compiled statements.
pub trait DatabaseConnection: Send + Sync {
    /// Execute one statement and return its rows and counts.
    fn execute_query(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send;

    /// Execute one statement, delivering rows in chunks of `chunk_size`.
    ///
    /// Connections that cannot stream keep the default, which fails.
    fn stream_query(
        &self,
        _cx: &Cx,
        _query: &CompiledQuery,
        _chunk_size: usize,
    ) -> impl Future<Output = Outcome<Vec<QueryResult>, Error>> + Send {
        async { Outcome::Err(Error::Unsupported("this connection does not support streaming queries")) }
    }
}

/// A database driver.
///
/// The driver lazily creates its underlying resources in [`Driver::init`],
/// hands out connections, brackets transactions and tears everything down in
/// [`Driver::destroy`].
pub trait Driver: Send + Sync {
    /// The acquired connection type. Holding one grants exclusive use until
    /// it is passed back to [`Driver::release_connection`] or dropped.
    type Connection: DatabaseConnection;

    /// Initialize the driver. Calling it again after success is a no-op.
    fn init(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Acquire a connection, waiting while another caller holds it.
    fn acquire_connection(
        &self,
        cx: &Cx,
    ) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send;

    /// Start a transaction on the given connection.
    fn begin_transaction(
        &self,
        cx: &Cx,
        connection: &mut Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn commit_transaction(
        &self,
        cx: &Cx,
        connection: &mut Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn rollback_transaction(
        &self,
        cx: &Cx,
        connection: &mut Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Give a connection back so the next waiter can acquire it.
    fn release_connection(
        &self,
        cx: &Cx,
        connection: Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Close all resources. A later `init` starts from scratch.
    fn destroy(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// Something that can run a compiled statement from start to finish,
/// including acquiring and releasing whatever connection it needs.
pub trait QueryExecutor: Clone + Send + Sync {
    fn execute_compiled(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send;
}
