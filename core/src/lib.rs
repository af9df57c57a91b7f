//! Configuration and tenant addressing for per-tenant SQLite databases.
//!
//! This crate holds the pieces of the tenant database layer that do not touch
//! the engine:
//!
//! - [`TenantDbConfig`]: database root, file-name pattern, migrations
//!   directory and skip-list policy, loadable from YAML.
//! - [`tenant_file_path`]: pure mapping from tenant identifier to file path.
//! - [`validate_tenant_id`]: rejects identifiers that could escape the root.
//!
//! # Example
//!
//! ```
//! use tenantdb_core::TenantDbConfig;
//!
//! let config = TenantDbConfig::new("/var/lib/quiz", "migrations");
//! assert!(config.validate().is_ok());
//! assert!(config.tenant_path("acme").unwrap().ends_with("acme.db"));
//! assert!(config.tenant_path("../escape").is_err());
//! ```

mod config;
mod error;
mod tenant;

pub use config::{DEFAULT_FILE_PATTERN, LegacyColumnCheck, SkipPolicyConfig, TenantDbConfig};
pub use error::{ConfigError, Result};
pub use tenant::{TENANT_PLACEHOLDER, tenant_file_path, validate_pattern, validate_tenant_id};
