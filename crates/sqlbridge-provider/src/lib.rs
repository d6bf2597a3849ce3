//! Application-scope provider for SQLBridge databases.
//!
//! A [`DatabaseProvider`] owns one SQLite-backed [`Database`] for as long as
//! it is mounted. Code running inside [`DatabaseProvider::enter`] reaches it
//! through [`use_database`] and [`use_database_context`].
//!
//! ```rust,ignore
//! let provider = DatabaseProvider::new(
//!     ProviderProps::new(OpSqliteConfig::memory()).on_init(|cx, db| {
//!         Box::pin(async move {
//!             db.execute(cx, &Query::raw("CREATE TABLE person (id INTEGER PRIMARY KEY)"))
//!                 .await
//!                 .map(|_| ())
//!         })
//!     }),
//! );
//! provider.mount(&cx).await;
//! let _scope = provider.enter();
//! let db = use_database()?;
//! ```
//!
//! [`Database`]: sqlbridge_query::Database

pub mod context;
pub mod error;
pub mod provider;

pub use context::{DatabaseContext, ProviderScope, use_database, use_database_context};
pub use error::ProviderError;
pub use provider::{
    BoxFuture, DatabaseProvider, InitHook, ProviderErrorHook, ProviderProps, SqliteDatabase,
};
