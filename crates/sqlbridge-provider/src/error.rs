//! Errors raised by the provider hooks.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// A hook was called with no provider scope entered on this thread.
    NotInProvider { hook: &'static str },
    /// The provider has not finished initializing the database.
    NotReady,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NotInProvider { hook } => {
                write!(f, "{} must be used within a DatabaseProvider", hook)
            }
            ProviderError::NotReady => {
                write!(f, "Database not initialized yet. Check is_ready before using.")
            }
        }
    }
}

impl std::error::Error for ProviderError {}
