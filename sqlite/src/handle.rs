//! Open tenant databases.
//!
//! A [`TenantHandle`] wraps one tenant's in-memory engine together with its
//! file path. Every write issued through the handle is followed by an export
//! of the whole database image, and writes to the same tenant are serialized
//! by a per-tenant lock so that two exports never race each other.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::adapter::Statement;
use crate::error::{Result, TenantDbError};
use crate::migration::{MigrationReport, Migrator};
use crate::persist::{export_connection, load_connection};

struct HandleState {
    conn: Option<Connection>,
    /// Writes not yet exported because a transaction was open.
    dirty: bool,
}

struct HandleInner {
    tenant_id: String,
    path: PathBuf,
    existed_on_disk: bool,
    report: MigrationReport,
    state: Mutex<HandleState>,
}

/// A live, migrated tenant database.
///
/// Handles are cheap to clone; every clone refers to the same engine and
/// the same write lock. Obtain one from
/// [`TenantRegistry::get_connection`](crate::TenantRegistry::get_connection).
#[derive(Clone)]
pub struct TenantHandle {
    inner: Arc<HandleInner>,
}

impl TenantHandle {
    /// Loads `path` (or starts empty), runs migrations and exports the
    /// result so a new tenant's file reflects its schema immediately.
    pub(crate) fn open(tenant_id: &str, path: PathBuf, migrator: &Migrator) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| TenantDbError::io(parent, e))?;
        }

        let (conn, existed_on_disk) = load_connection(&path)?;
        let report = migrator.run(&conn)?;
        export_connection(&conn, &path)?;

        info!(
            tenant = tenant_id,
            path = %path.display(),
            existed_on_disk,
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "opened tenant database"
        );

        Ok(Self {
            inner: Arc::new(HandleInner {
                tenant_id: tenant_id.to_string(),
                path,
                existed_on_disk,
                report,
                state: Mutex::new(HandleState {
                    conn: Some(conn),
                    dirty: false,
                }),
            }),
        })
    }

    /// Tenant identifier.
    pub fn tenant_id(&self) -> &str {
        &self.inner.tenant_id
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether the database file existed when the handle was opened.
    pub fn existed_on_disk(&self) -> bool {
        self.inner.existed_on_disk
    }

    /// Migrations applied or skipped while opening this handle.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.inner.report
    }

    /// Whether [`close`](Self::close) has completed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().conn.is_none()
    }

    /// Compiles `sql` and returns a reusable [`Statement`].
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL does not compile or the handle is closed.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        self.with_connection(|conn| {
            conn.prepare_cached(sql)?;
            Ok(())
        })?;
        Ok(Statement::new(self, sql))
    }

    /// Executes an unparameterized batch of statements, then persists.
    pub fn exec(&self, sql: &str) -> Result<()> {
        self.write(|conn| Ok(conn.execute_batch(sql)?))
    }

    /// Writes the current database image to disk.
    ///
    /// Inside an explicit transaction the export is deferred until the
    /// transaction ends.
    pub fn export(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.dirty = true;
        self.flush_locked(&mut state)
    }

    /// Exports the database and closes the engine.
    ///
    /// An open transaction is rolled back first. Closing twice is a no-op.
    /// If the engine refuses to close, the handle stays open and the error
    /// is returned.
    pub fn close(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        let Some(conn) = state.conn.as_ref() else {
            return Ok(());
        };

        if !conn.is_autocommit() {
            warn!(tenant = %self.inner.tenant_id, "rolling back open transaction on close");
            conn.execute_batch("ROLLBACK")?;
        }
        export_connection(conn, &self.inner.path)?;
        state.dirty = false;

        if let Some(conn) = state.conn.take() {
            if let Err((conn, err)) = conn.close() {
                state.conn = Some(conn);
                return Err(err.into());
            }
        }
        debug!(tenant = %self.inner.tenant_id, "closed tenant database");
        Ok(())
    }

    /// Runs `f` against the engine under the tenant lock, without exporting.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let state = self.inner.state.lock();
        let conn = state.conn.as_ref().ok_or_else(|| self.closed())?;
        f(conn)
    }

    /// Runs a mutating `f` under the tenant lock, then exports.
    ///
    /// The export is attempted even if `f` fails, since a batch may have
    /// committed some statements before the failing one.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut state = self.inner.state.lock();
        let result = {
            let conn = state.conn.as_ref().ok_or_else(|| self.closed())?;
            f(conn)
        };
        state.dirty = true;
        let flushed = self.flush_locked(&mut state);
        let value = result?;
        flushed?;
        Ok(value)
    }

    fn flush_locked(&self, state: &mut HandleState) -> Result<()> {
        let conn = state.conn.as_ref().ok_or_else(|| self.closed())?;
        if !state.dirty {
            return Ok(());
        }
        if !conn.is_autocommit() {
            debug!(tenant = %self.inner.tenant_id, "export deferred until transaction ends");
            return Ok(());
        }
        export_connection(conn, &self.inner.path)?;
        state.dirty = false;
        Ok(())
    }

    fn closed(&self) -> TenantDbError {
        TenantDbError::HandleClosed(self.inner.tenant_id.clone())
    }
}

impl fmt::Debug for TenantHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantHandle")
            .field("tenant_id", &self.inner.tenant_id)
            .field("path", &self.inner.path)
            .field("existed_on_disk", &self.inner.existed_on_disk)
            .finish_non_exhaustive()
    }
}
