//! Migration engine.
//!
//! Provides [`Migrator`], which brings a tenant database up to date with a
//! directory of SQL migration files. Each file is applied at most once per
//! database, in ascending file-name order, and recorded in the ledger table
//! the moment it completes or is deliberately skipped.
//!
//! # Algorithm
//!
//! 1. Create the migrations directory if missing.
//! 2. Ensure the ledger table exists.
//! 3. List `*.sql` files sorted by name.
//! 4. For each file: skip it if already in the ledger; otherwise consult the
//!    [`SkipPolicy`]. A skip records the ledger entry without running SQL.
//!    Anything else reads the file, strips byte-order marks, executes it as
//!    one batch and records the entry on success.
//!
//! A failing script aborts the run. No ledger entry is written for it, so
//! the next run retries it. Statements are not wrapped in a transaction by
//! the engine because scripts may manage their own; a best-effort `ROLLBACK`
//! is issued if the failure leaves a transaction open.
//!
//! # Example
//!
//! ```no_run
//! use rusqlite::Connection;
//! use tenantdb_sqlite::{Migrator, SkipPolicy};
//!
//! let conn = Connection::open_in_memory().unwrap();
//! let migrator = Migrator::new("migrations", SkipPolicy::new()).unwrap();
//!
//! let report = migrator.run(&conn).unwrap();
//! println!("applied {} migration(s)", report.applied.len());
//!
//! for state in migrator.status(&conn).unwrap() {
//!     println!("{} applied={}", state.name, state.applied_at.is_some());
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use tenantdb_core::TenantDbConfig;
use tracing::{debug, info};

use crate::error::{Result, TenantDbError};
use crate::ledger::Ledger;
use crate::skip::{Decision, SkipPolicy, SkipReason};
use crate::source::{MigrationFile, MigrationSource};

/// Applies ordered SQL migrations to tenant databases.
#[derive(Debug, Clone)]
pub struct Migrator {
    source: MigrationSource,
    policy: SkipPolicy,
}

impl Migrator {
    /// Creates a migrator for the given directory and skip policy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `dir` is empty.
    pub fn new(dir: impl AsRef<Path>, policy: SkipPolicy) -> Result<Self> {
        Ok(Self {
            source: MigrationSource::new(dir)?,
            policy,
        })
    }

    /// Creates a migrator from the migrations directory and skip settings of
    /// a registry configuration.
    pub fn from_config(config: &TenantDbConfig) -> Result<Self> {
        Self::new(
            &config.migrations_dir,
            SkipPolicy::from_config(&config.skip),
        )
    }

    /// Migration file source.
    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// Skip policy in effect.
    pub fn policy(&self) -> &SkipPolicy {
        &self.policy
    }

    /// Applies every unapplied migration in name order.
    ///
    /// Running twice is a no-op the second time.
    ///
    /// # Errors
    ///
    /// Returns [`TenantDbError::Migration`] for the first script that fails,
    /// [`TenantDbError::Encoding`] for a non-UTF-8 script, and I/O or
    /// engine errors for directory and ledger access.
    pub fn run(&self, conn: &Connection) -> Result<MigrationReport> {
        self.source.ensure_dir()?;
        let ledger = Ledger::new(conn);
        ledger.ensure()?;

        let files = self.source.discover()?;
        let applied = ledger.applied_names()?;
        let mut report = MigrationReport::default();

        for file in &files {
            if applied.contains(file.name()) {
                report.already_applied += 1;
                continue;
            }

            match self.policy.decide(conn, file.name())? {
                Decision::Skip(reason) => {
                    ledger.record(file.name())?;
                    info!(migration = file.name(), %reason, "migration marked applied without executing");
                    report.skipped.push(SkippedMigration {
                        name: file.name().to_string(),
                        reason,
                    });
                }
                Decision::Execute => {
                    apply(conn, file)?;
                    ledger.record(file.name())?;
                    info!(migration = file.name(), "migration applied");
                    report.applied.push(file.name().to_string());
                }
            }
        }

        debug!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            already_applied = report.already_applied,
            "migration run complete"
        );
        Ok(report)
    }

    /// Returns the names of migrations not yet in the ledger, in apply order.
    pub fn pending(&self, conn: &Connection) -> Result<Vec<String>> {
        let applied = self.applied_at(conn)?;
        Ok(self
            .source
            .discover()?
            .into_iter()
            .filter(|file| !applied.contains_key(file.name()))
            .map(|file| file.name().to_string())
            .collect())
    }

    /// Reports every migration file with its ledger state, followed by ledger
    /// entries whose file no longer exists.
    ///
    /// Does not create the ledger table.
    pub fn status(&self, conn: &Connection) -> Result<Vec<MigrationState>> {
        let mut applied = self.applied_at(conn)?;
        let mut states = Vec::new();

        for file in self.source.discover()? {
            states.push(MigrationState {
                applied_at: applied.remove(file.name()),
                checksum: Some(file.checksum()?),
                on_disk: true,
                name: file.name().to_string(),
            });
        }

        let mut orphaned: Vec<_> = applied.into_iter().collect();
        orphaned.sort();
        states.extend(orphaned.into_iter().map(|(name, applied_at)| MigrationState {
            name,
            applied_at: Some(applied_at),
            checksum: None,
            on_disk: false,
        }));

        Ok(states)
    }

    fn applied_at(&self, conn: &Connection) -> Result<HashMap<String, String>> {
        let ledger = Ledger::new(conn);
        if !ledger.exists()? {
            return Ok(HashMap::new());
        }
        Ok(ledger
            .entries()?
            .into_iter()
            .map(|entry| (entry.name, entry.applied_at))
            .collect())
    }
}

/// Executes one migration script as a single batch.
fn apply(conn: &Connection, file: &MigrationFile) -> Result<()> {
    let sql = file.read_sql()?;
    if let Err(source) = conn.execute_batch(&sql) {
        if !conn.is_autocommit() {
            let _ = conn.execute_batch("ROLLBACK");
        }
        return Err(TenantDbError::Migration {
            name: file.name().to_string(),
            source,
        });
    }
    Ok(())
}

/// A migration recorded without executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMigration {
    /// Migration file name.
    pub name: String,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Outcome of one [`Migrator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Migrations executed in this run, in order.
    pub applied: Vec<String>,
    /// Migrations recorded without executing in this run, in order.
    pub skipped: Vec<SkippedMigration>,
    /// Migrations that were already in the ledger.
    pub already_applied: usize,
}

impl MigrationReport {
    /// Returns `true` if this run changed the ledger.
    pub fn changed(&self) -> bool {
        !self.applied.is_empty() || !self.skipped.is_empty()
    }
}

/// Ledger state of one migration, as reported by [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationState {
    /// Migration file name.
    pub name: String,
    /// When it was recorded, if it has been.
    pub applied_at: Option<String>,
    /// SHA-256 of the file; `None` when the file no longer exists.
    pub checksum: Option<String>,
    /// Whether the file is still in the migrations directory.
    pub on_disk: bool,
}
