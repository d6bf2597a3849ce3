//! Driver configuration.

use crate::native::{NativeDatabase, OpenOptions};
use sqlbridge_core::Error;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with a context message and the error whenever a
/// statement fails.
pub type ErrorHook = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// Where the driver's database comes from.
#[derive(Debug, Clone)]
pub enum DatabaseSource {
    /// An already open handle. The driver takes ownership and closes it on
    /// destroy.
    Existing(NativeDatabase),
    /// Open a new handle on first use.
    Open(OpenOptions),
}

impl Default for DatabaseSource {
    fn default() -> Self {
        DatabaseSource::Open(OpenOptions::memory())
    }
}

impl From<NativeDatabase> for DatabaseSource {
    fn from(db: NativeDatabase) -> Self {
        DatabaseSource::Existing(db)
    }
}

impl From<OpenOptions> for DatabaseSource {
    fn from(options: OpenOptions) -> Self {
        DatabaseSource::Open(options)
    }
}

/// Configuration for [`OpSqliteDriver`](crate::OpSqliteDriver).
#[derive(Clone, Default)]
pub struct OpSqliteConfig {
    pub database: DatabaseSource,
    /// Skip `PRAGMA foreign_keys = ON` after opening.
    pub disable_foreign_keys: bool,
    /// Leave `CREATE TABLE` statements as written instead of appending `STRICT`.
    pub disable_strict_mode_create_table: bool,
    /// Decode boolean, timestamp and JSON text when reading rows.
    pub auto_affinity_conversion: bool,
    /// Let callers use the connection concurrently. Only safe when the
    /// caller already serializes access.
    pub disable_mutex: bool,
    /// Log every statement with its parameters.
    pub debug: bool,
    pub on_error: Option<ErrorHook>,
}

impl fmt::Debug for OpSqliteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpSqliteConfig")
            .field("database", &self.database)
            .field("disable_foreign_keys", &self.disable_foreign_keys)
            .field("disable_strict_mode_create_table", &self.disable_strict_mode_create_table)
            .field("auto_affinity_conversion", &self.auto_affinity_conversion)
            .field("disable_mutex", &self.disable_mutex)
            .field("debug", &self.debug)
            .field("on_error", &self.on_error.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

impl OpSqliteConfig {
    /// Open (or create) a database file on first use.
    pub fn open(options: OpenOptions) -> Self {
        Self {
            database: DatabaseSource::Open(options),
            ..Default::default()
        }
    }

    /// Use a private in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Adopt a handle the application already opened.
    pub fn existing(db: NativeDatabase) -> Self {
        Self {
            database: DatabaseSource::Existing(db),
            ..Default::default()
        }
    }

    pub fn disable_foreign_keys(mut self, disable: bool) -> Self {
        self.disable_foreign_keys = disable;
        self
    }

    pub fn disable_strict_mode_create_table(mut self, disable: bool) -> Self {
        self.disable_strict_mode_create_table = disable;
        self
    }

    pub fn auto_affinity_conversion(mut self, enable: bool) -> Self {
        self.auto_affinity_conversion = enable;
        self
    }

    pub fn disable_mutex(mut self, disable: bool) -> Self {
        self.disable_mutex = disable;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&str, &Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}
