//! Per-thread provider scopes and the hooks that read them.

use crate::error::ProviderError;
use crate::provider::{ProviderShared, SqliteDatabase};
use sqlbridge_core::Error;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static SCOPES: RefCell<Vec<Arc<ProviderShared>>> = const { RefCell::new(Vec::new()) };
}

/// What code running inside a provider can see.
#[derive(Debug, Clone, Default)]
pub struct DatabaseContext {
    /// Published once initialization succeeds.
    pub db: Option<SqliteDatabase>,
    pub is_ready: bool,
    /// Initialization failure, if any.
    pub error: Option<Arc<Error>>,
}

/// Guard keeping a provider current on this thread.
///
/// Scopes nest: the innermost one shadows the others until it is dropped.
#[must_use = "the provider is only current while the scope is alive"]
pub struct ProviderScope {
    depth: usize,
    // Tied to the thread whose scope stack it pushed onto.
    _not_send: PhantomData<*const ()>,
}

impl ProviderScope {
    pub(crate) fn enter(shared: Arc<ProviderShared>) -> Self {
        let depth = SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            scopes.push(shared);
            scopes.len() - 1
        });
        Self {
            depth,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ProviderScope {
    fn drop(&mut self) {
        SCOPES.with(|scopes| scopes.borrow_mut().truncate(self.depth));
    }
}

fn current(hook: &'static str) -> Result<Arc<ProviderShared>, ProviderError> {
    SCOPES
        .with(|scopes| scopes.borrow().last().cloned())
        .ok_or(ProviderError::NotInProvider { hook })
}

/// The current provider's database handle.
///
/// Fails outside a provider scope, and before the provider is ready.
pub fn use_database() -> Result<SqliteDatabase, ProviderError> {
    current("use_database")?
        .context()
        .db
        .ok_or(ProviderError::NotReady)
}

/// The current provider's full context, including readiness and errors.
pub fn use_database_context() -> Result<DatabaseContext, ProviderError> {
    Ok(current("use_database_context")?.context())
}
