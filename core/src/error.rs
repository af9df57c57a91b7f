//! Error types for configuration and tenant identifier handling.

use thiserror::Error;

/// Errors raised while loading or validating tenant database configuration.
///
/// These are fatal at startup: nothing in the workspace retries them.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A required path setting is empty.
    #[error("missing setting: {0} must not be empty")]
    MissingSetting(&'static str),

    /// File-name pattern does not contain the tenant placeholder.
    #[error("invalid file pattern '{0}': must contain {{tenantId}}")]
    InvalidPattern(String),

    /// Tenant identifier is empty or contains characters unsafe in a file name.
    #[error(
        "invalid tenant id '{0}': must be non-empty, not start with '.', and contain only alphanumerics, '-', '_' or '.'"
    )]
    InvalidTenantId(String),
}

/// Convenience alias for results with [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;
