//! Provider owning the database handle for an application scope.
//!
//! [`DatabaseProvider::mount`] builds the dialect and database, runs the
//! `on_init` hook (typically migrations) and then publishes the handle.
//! [`DatabaseProvider::unmount`] tears the handle down again, even when
//! initialization is still in flight.

use crate::context::{DatabaseContext, ProviderScope};
use asupersync::{Cx, Outcome};
use sqlbridge_core::{Driver, Error};
use sqlbridge_query::Database;
use sqlbridge_sqlite::{OpSqliteDialect, OpSqliteDialectConfig};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The database handle a provider publishes.
pub type SqliteDatabase = Database<OpSqliteDialect>;

/// Boxed future returned by provider hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async hook run once the database handle exists, before it is published.
pub type InitHook =
    Arc<dyn for<'a> Fn(&'a Cx, SqliteDatabase) -> BoxFuture<'a, Outcome<(), Error>> + Send + Sync>;

/// Receives initialization failures and, through the driver, query failures.
pub type ProviderErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

/// Everything a [`DatabaseProvider`] needs.
#[derive(Clone, Default)]
pub struct ProviderProps {
    pub config: OpSqliteDialectConfig,
    pub on_init: Option<InitHook>,
    /// Replaces any `on_error` set in `config`.
    pub on_error: Option<ProviderErrorHook>,
}

impl fmt::Debug for ProviderProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderProps")
            .field("config", &self.config)
            .field("on_init", &self.on_init.as_ref().map(|_| "<hook>"))
            .field("on_error", &self.on_error.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

impl ProviderProps {
    pub fn new(config: OpSqliteDialectConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a Cx, SqliteDatabase) -> BoxFuture<'a, Outcome<(), Error>>
            + Send
            + Sync
            + 'static,
    {
        self.on_init = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Dialect config with the provider's error hook wired into the driver.
    fn dialect_config(&self) -> OpSqliteDialectConfig {
        let mut config = self.config.clone();
        if let Some(hook) = &self.on_error {
            let hook = Arc::clone(hook);
            config.on_error = Some(Arc::new(move |_message: &str, err: &Error| hook(err)));
        }
        config
    }
}

#[derive(Default)]
struct ProviderState {
    started: bool,
    mounted: bool,
    /// Handle created by `mount`, published or not.
    created: Option<SqliteDatabase>,
    published: Option<SqliteDatabase>,
    is_ready: bool,
    error: Option<Arc<Error>>,
}

pub(crate) struct ProviderShared {
    props: ProviderProps,
    state: Mutex<ProviderState>,
}

impl ProviderShared {
    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn context(&self) -> DatabaseContext {
        let state = self.lock();
        DatabaseContext {
            db: state.published.clone(),
            is_ready: state.is_ready,
            error: state.error.clone(),
        }
    }
}

/// Owns one database for the lifetime of a mount.
#[derive(Clone)]
pub struct DatabaseProvider {
    shared: Arc<ProviderShared>,
}

impl fmt::Debug for DatabaseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("DatabaseProvider")
            .field("mounted", &state.mounted)
            .field("is_ready", &state.is_ready)
            .field("has_error", &state.error.is_some())
            .finish()
    }
}

impl DatabaseProvider {
    /// Create a provider. Nothing is opened until [`mount`](Self::mount).
    pub fn new(props: ProviderProps) -> Self {
        Self {
            shared: Arc::new(ProviderShared {
                props,
                state: Mutex::new(ProviderState::default()),
            }),
        }
    }

    /// Initialize the database. Only the first call does anything.
    pub async fn mount(&self, cx: &Cx) {
        let db = {
            let mut state = self.shared.lock();
            state.mounted = true;
            if state.started {
                tracing::trace!("database provider already started");
                return;
            }
            state.started = true;
            let db = Database::new(OpSqliteDialect::new(self.shared.props.dialect_config()));
            state.created = Some(db.clone());
            db
        };
        tracing::info!("mounting database provider");

        let outcome = match db.driver().init(cx).await {
            Outcome::Ok(()) => match &self.shared.props.on_init {
                Some(hook) => hook(cx, db.clone()).await,
                None => Outcome::Ok(()),
            },
            other => other,
        };

        let error = match outcome {
            Outcome::Ok(()) => {
                let mut state = self.shared.lock();
                if state.mounted {
                    state.published = Some(db);
                    state.is_ready = true;
                    tracing::info!("database provider ready");
                }
                return;
            }
            Outcome::Err(e) => e,
            Outcome::Cancelled(reason) => {
                tracing::debug!(reason = ?reason, "database initialization cancelled");
                return;
            }
            Outcome::Panicked(payload) => {
                Error::Custom(format!("database initialization panicked: {payload:?}"))
            }
        };

        let error = Arc::new(error);
        {
            let mut state = self.shared.lock();
            if state.mounted {
                state.error = Some(Arc::clone(&error));
            }
        }
        tracing::warn!(error = %error, "database initialization failed");
        if let Some(hook) = &self.shared.props.on_error {
            hook(&error);
        }
    }

    /// Stop publishing the database and destroy the handle `mount` created.
    pub async fn unmount(&self, cx: &Cx) {
        let db = {
            let mut state = self.shared.lock();
            state.mounted = false;
            state.published = None;
            state.is_ready = false;
            state.created.take()
        };
        let Some(db) = db else {
            return;
        };
        tracing::info!("unmounting database provider");
        match db.destroy(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => {
                tracing::warn!(error = %e, "failed to destroy database on unmount");
            }
            Outcome::Cancelled(reason) => {
                tracing::warn!(reason = ?reason, "database destroy cancelled on unmount");
            }
            Outcome::Panicked(payload) => {
                tracing::warn!(payload = ?payload, "database destroy panicked on unmount");
            }
        }
    }

    /// Snapshot of what hooks inside this provider see.
    pub fn context(&self) -> DatabaseContext {
        self.shared.context()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.lock().is_ready
    }

    /// Make this provider current for the calling thread until the returned
    /// scope is dropped.
    pub fn enter(&self) -> ProviderScope {
        ProviderScope::enter(Arc::clone(&self.shared))
    }
}
