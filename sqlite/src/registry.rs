//! Tenant connection registry.
//!
//! [`TenantRegistry`] maps tenant identifiers to open, migrated
//! [`TenantHandle`]s. Handles are created lazily on first use and cached
//! until [`TenantRegistry::close_all`]. The registry is an ordinary value:
//! construct one per process and share it behind an `Arc`.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use tenantdb_core::{TenantDbConfig, validate_tenant_id};
use tracing::{debug, info, warn};

use crate::error::{CloseFailure, Result, TenantDbError};
use crate::handle::TenantHandle;
use crate::migration::Migrator;

/// Lazily opens and caches one database handle per tenant.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tenantdb_core::TenantDbConfig;
/// use tenantdb_sqlite::TenantRegistry;
///
/// let registry = Arc::new(TenantRegistry::new(TenantDbConfig::new("data", "migrations")).unwrap());
///
/// let acme = registry.get_connection("acme").unwrap();
/// acme.exec("INSERT INTO widgets (id) VALUES ('w1')").unwrap();
///
/// let report = registry.close_all();
/// report.into_result().unwrap();
/// ```
#[derive(Debug)]
pub struct TenantRegistry {
    config: TenantDbConfig,
    migrator: Migrator,
    handles: Mutex<HashMap<String, TenantHandle>>,
}

impl TenantRegistry {
    /// Creates a registry.
    ///
    /// # Errors
    ///
    /// Returns [`TenantDbError::Config`] if the configuration is incomplete.
    pub fn new(config: TenantDbConfig) -> Result<Self> {
        config.validate()?;
        let migrator = Migrator::from_config(&config)?;
        Ok(Self {
            config,
            migrator,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Registry configuration.
    pub fn config(&self) -> &TenantDbConfig {
        &self.config
    }

    /// Migrator used for every tenant opened by this registry.
    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    /// Database file path for `tenant_id`.
    pub fn tenant_path(&self, tenant_id: &str) -> Result<PathBuf> {
        Ok(self.config.tenant_path(tenant_id)?)
    }

    /// Returns the handle for `tenant_id`, opening and migrating it first
    /// if it is not cached.
    ///
    /// Repeated calls return clones of the same handle without re-running
    /// migrations. A handle closed explicitly by a caller is reopened from
    /// its file.
    ///
    /// # Errors
    ///
    /// Fails on an invalid tenant identifier, an unreadable file, or a
    /// failing migration. Nothing is cached on failure, so the next call
    /// retries.
    ///
    /// The registry lock is held while a tenant is opened and migrated, so a
    /// slow first open delays lookups for every other tenant.
    pub fn get_connection(&self, tenant_id: &str) -> Result<TenantHandle> {
        validate_tenant_id(tenant_id)?;

        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(tenant_id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
            debug!(tenant = tenant_id, "reopening closed tenant database");
        }

        let path = self.tenant_path(tenant_id)?;
        let handle = TenantHandle::open(tenant_id, path, &self.migrator)?;
        handles.insert(tenant_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Identifiers of the cached tenants, sorted.
    pub fn open_tenants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Exports and closes every cached handle.
    ///
    /// A tenant that fails to close does not stop the others; its error is
    /// collected in the returned report. Handles that are still open after a
    /// failed close stay cached, so later lookups keep sharing one engine.
    pub fn close_all(&self) -> CloseReport {
        let mut handles = self.handles.lock();
        let mut drained: Vec<(String, TenantHandle)> = handles.drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = CloseReport::default();
        for (tenant_id, handle) in drained {
            match handle.close() {
                Ok(()) => report.closed.push(tenant_id),
                Err(error) => {
                    warn!(tenant = %tenant_id, %error, "failed to close tenant database");
                    if !handle.is_closed() {
                        handles.insert(tenant_id.clone(), handle);
                    }
                    report.failures.push(CloseFailure { tenant_id, error });
                }
            }
        }

        info!(
            closed = report.closed.len(),
            failed = report.failures.len(),
            "closed tenant databases"
        );
        report
    }
}

/// Outcome of [`TenantRegistry::close_all`].
#[derive(Debug, Default)]
pub struct CloseReport {
    /// Tenants closed cleanly, sorted.
    pub closed: Vec<String>,
    /// Tenants whose export or close failed.
    pub failures: Vec<CloseFailure>,
}

impl CloseReport {
    /// Returns `true` if every tenant closed cleanly.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts the report into an error if any tenant failed.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.failures.is_empty() {
            Ok(self.closed)
        } else {
            Err(TenantDbError::CloseFailed(self.failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tenantdb_core::ConfigError;

    fn registry(dir: &TempDir) -> TenantRegistry {
        let migrations = dir.path().join("migrations");
        fs::create_dir_all(&migrations).unwrap();
        fs::write(
            migrations.join("001_notes.sql"),
            "CREATE TABLE notes (body TEXT);",
        )
        .unwrap();
        TenantRegistry::new(TenantDbConfig::new(dir.path().join("data"), migrations)).unwrap()
    }

    #[test]
    fn test_rejects_incomplete_config() {
        let err = TenantRegistry::new(TenantDbConfig::new("data", "")).unwrap_err();
        assert!(matches!(
            err,
            TenantDbError::Config(ConfigError::MissingSetting("migrations_dir"))
        ));
    }

    #[test]
    fn test_rejects_invalid_tenant_id() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        for id in ["", "../evil", "a/b"] {
            assert!(matches!(
                registry.get_connection(id),
                Err(TenantDbError::Config(ConfigError::InvalidTenantId(_)))
            ));
        }
        assert!(registry.open_tenants().is_empty());
    }

    #[test]
    fn test_get_connection_is_cached() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let first = registry.get_connection("acme").unwrap();
        assert_eq!(first.migration_report().applied.len(), 1);
        first.exec("INSERT INTO notes VALUES ('hi')").unwrap();

        let second = registry.get_connection("acme").unwrap();
        assert_eq!(second.migration_report(), first.migration_report());
        let n: i64 = second
            .with_connection(|c| Ok(c.query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(registry.open_tenants(), vec!["acme"]);
    }

    #[test]
    fn test_reopens_after_explicit_close() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let handle = registry.get_connection("acme").unwrap();
        handle.exec("INSERT INTO notes VALUES ('kept')").unwrap();
        handle.close().unwrap();

        let reopened = registry.get_connection("acme").unwrap();
        assert!(!reopened.is_closed());
        assert!(reopened.existed_on_disk());
        assert!(reopened.migration_report().applied.is_empty());
        let body: String = reopened
            .with_connection(|c| Ok(c.query_row("SELECT body FROM notes", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(body, "kept");
    }

    #[test]
    fn test_close_all_empties_cache() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let b = registry.get_connection("b").unwrap();
        registry.get_connection("a").unwrap();

        let report = registry.close_all();
        assert!(report.is_clean());
        assert_eq!(report.closed, vec!["a", "b"]);
        assert!(registry.open_tenants().is_empty());
        assert!(b.is_closed());

        assert!(registry.close_all().into_result().unwrap().is_empty());
    }

    #[test]
    fn test_handles_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TenantRegistry>();
        assert_send_sync::<TenantHandle>();
    }
}
