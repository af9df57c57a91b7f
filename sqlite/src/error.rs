//! Error types for tenant database operations.
//!
//! Provides a unified error type covering engine failures, configuration
//! problems, file persistence, migration execution and shutdown.

use std::path::PathBuf;

use tenantdb_core::ConfigError;
use thiserror::Error;

/// A tenant whose handle could not be closed during bulk shutdown.
#[derive(Debug)]
pub struct CloseFailure {
    /// Tenant identifier.
    pub tenant_id: String,
    /// Error raised while exporting or closing the handle.
    pub error: TenantDbError,
}

/// Errors that can occur during tenant database operations.
#[derive(Debug, Error)]
pub enum TenantDbError {
    /// SQLite engine failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Invalid configuration or tenant identifier.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem failure while loading, exporting or listing files.
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A migration script failed to execute. No ledger entry was written.
    #[error("migration '{name}' failed: {source}")]
    Migration {
        /// Migration file name.
        name: String,
        /// Engine error raised by the script.
        source: rusqlite::Error,
    },

    /// A migration file is not valid UTF-8.
    #[error("migration '{name}' is not valid UTF-8")]
    Encoding {
        /// Migration file name.
        name: String,
    },

    /// The tenant handle was closed.
    #[error("handle for tenant '{0}' is closed")]
    HandleClosed(String),

    /// One or more tenants failed to close during bulk shutdown.
    #[error("failed to close {} tenant database(s)", .0.len())]
    CloseFailed(Vec<CloseFailure>),
}

impl TenantDbError {
    /// Wraps an I/O error with the path that triggered it.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias for results with [`TenantDbError`].
pub type Result<T> = std::result::Result<T, TenantDbError>;
