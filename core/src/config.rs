//! Configuration for the tenant connection registry.
//!
//! Defines the YAML-serializable settings the registry consumes: where tenant
//! database files live, how a tenant identifier maps to a file name, where
//! migration scripts are found, and which migrations the skip policy marks
//! applied without executing.
//!
//! # Example YAML
//!
//! ```yaml
//! database_root: /var/lib/quiz/tenants
//! file_pattern: "{tenantId}.db"
//! migrations_dir: ./migrations
//! skip:
//!   static_skips:
//!     - 007_fix_encoding.sql
//!   legacy_column_checks:
//!     - migration: 012_drop_item_legacy_code.sql
//!       table: items
//!       column: legacy_code
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::tenant::{tenant_file_path, validate_pattern};

/// Default file-name pattern for tenant databases.
pub const DEFAULT_FILE_PATTERN: &str = "{tenantId}.db";

fn default_file_pattern() -> String {
    DEFAULT_FILE_PATTERN.to_string()
}

/// A migration that only runs while a legacy column is still present.
///
/// If `table` no longer has `column` (or the table is gone), the migration's
/// structural change is already reflected in the schema and it is marked
/// applied without executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyColumnCheck {
    /// Migration file name the check applies to.
    pub migration: String,
    /// Table to inspect.
    pub table: String,
    /// Legacy column whose presence means the migration must still run.
    pub column: String,
}

/// Skip-list settings for the migration engine.
///
/// # Examples
///
/// ```
/// # use tenantdb_core::SkipPolicyConfig;
/// let skip = SkipPolicyConfig::default();
/// assert!(skip.static_skips.is_empty());
/// assert!(skip.legacy_column_checks.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipPolicyConfig {
    /// Migrations always marked applied without executing their SQL.
    #[serde(default)]
    pub static_skips: Vec<String>,
    /// Migrations gated on the presence of a legacy column.
    #[serde(default)]
    pub legacy_column_checks: Vec<LegacyColumnCheck>,
}

/// Top-level tenant database configuration.
///
/// # Examples
///
/// ```no_run
/// use tenantdb_core::TenantDbConfig;
///
/// let config = TenantDbConfig::load("tenantdb.yml").unwrap();
/// config.validate().unwrap();
/// println!("acme lives at {}", config.tenant_path("acme").unwrap().display());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDbConfig {
    /// Directory holding every tenant's database file.
    pub database_root: PathBuf,
    /// File-name pattern containing `{tenantId}`.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    /// Directory of `*.sql` migration scripts.
    pub migrations_dir: PathBuf,
    /// Skip-list policy.
    #[serde(default)]
    pub skip: SkipPolicyConfig,
}

impl TenantDbConfig {
    /// Creates a configuration with the default file pattern and no skips.
    pub fn new(database_root: impl Into<PathBuf>, migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_root: database_root.into(),
            file_pattern: default_file_pattern(),
            migrations_dir: migrations_dir.into(),
            skip: SkipPolicyConfig::default(),
        }
    }

    /// Replaces the file-name pattern.
    pub fn with_file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = pattern.into();
        self
    }

    /// Replaces the skip-list policy.
    pub fn with_skip_policy(mut self, skip: SkipPolicyConfig) -> Self {
        self.skip = skip;
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be written, or
    /// [`ConfigError::Yaml`] if serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Checks that every setting the registry depends on is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSetting`] for an empty database root or
    /// migrations directory, and [`ConfigError::InvalidPattern`] when the
    /// file pattern lacks the `{tenantId}` placeholder.
    pub fn validate(&self) -> Result<()> {
        if self.database_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingSetting("database_root"));
        }
        if self.migrations_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingSetting("migrations_dir"));
        }
        validate_pattern(&self.file_pattern)
    }

    /// Returns the database file path for `tenant_id`.
    pub fn tenant_path(&self, tenant_id: &str) -> Result<PathBuf> {
        tenant_file_path(&self.database_root, &self.file_pattern, tenant_id)
    }
}
