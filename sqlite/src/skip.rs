//! Skip-list policy for the migration engine.
//!
//! Some migrations are not safe to re-run verbatim: they were applied by
//! hand, carry historical encoding defects, or perform rename-recreate-reload
//! sequences that a previous code version already applied under another name.
//! The policy decides, per migration, whether its SQL runs or whether it is
//! recorded in the ledger without executing.
//!
//! Two independent mechanisms exist:
//!
//! - **Static skips** are always marked applied.
//! - **Legacy-column checks** inspect the live schema. While the legacy
//!   column is present the migration executes normally; once it is gone (or
//!   its table is) the migration is redundant and is marked applied.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use rusqlite::Connection;
use serde::Serialize;
use tenantdb_core::{LegacyColumnCheck, SkipPolicyConfig};
use tracing::debug;

use crate::error::Result;
use crate::schema::table_has_column;

/// Why a migration was marked applied without executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Listed in the static skip-list.
    Static,
    /// Every legacy column the migration targets is already gone.
    LegacyShapeAbsent {
        /// `table.column` pairs that were inspected.
        columns: Vec<String>,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static skip-list"),
            Self::LegacyShapeAbsent { columns } => {
                write!(f, "legacy column(s) already removed: {}", columns.join(", "))
            }
        }
    }
}

/// Outcome of evaluating the policy for one migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Run the migration's SQL.
    Execute,
    /// Record the migration without running it.
    Skip(SkipReason),
}

/// Static skip-list plus schema-introspection checks.
///
/// # Examples
///
/// ```
/// use rusqlite::Connection;
/// use tenantdb_sqlite::{Decision, SkipPolicy};
///
/// let policy = SkipPolicy::new()
///     .skip("004_broken_encoding.sql")
///     .skip_unless_column("007_drop_legacy.sql", "items", "legacy_code");
///
/// let conn = Connection::open_in_memory().unwrap();
/// conn.execute_batch("CREATE TABLE items (id TEXT PRIMARY KEY)").unwrap();
///
/// assert!(matches!(policy.decide(&conn, "004_broken_encoding.sql").unwrap(), Decision::Skip(_)));
/// assert!(matches!(policy.decide(&conn, "007_drop_legacy.sql").unwrap(), Decision::Skip(_)));
/// assert_eq!(policy.decide(&conn, "008_other.sql").unwrap(), Decision::Execute);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SkipPolicy {
    static_skips: BTreeSet<String>,
    column_checks: HashMap<String, Vec<(String, String)>>,
}

impl SkipPolicy {
    /// Creates an empty policy that executes every migration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a policy from configuration.
    pub fn from_config(config: &SkipPolicyConfig) -> Self {
        let mut policy = Self::new();
        for name in &config.static_skips {
            policy = policy.skip(name.clone());
        }
        for LegacyColumnCheck {
            migration,
            table,
            column,
        } in &config.legacy_column_checks
        {
            policy = policy.skip_unless_column(migration.clone(), table.clone(), column.clone());
        }
        policy
    }

    /// Adds a migration to the static skip-list.
    pub fn skip(mut self, migration: impl Into<String>) -> Self {
        self.static_skips.insert(migration.into());
        self
    }

    /// Gates a migration on the presence of `table.column`.
    ///
    /// Several checks for the same migration combine: it executes if any
    /// listed column is still present.
    pub fn skip_unless_column(
        mut self,
        migration: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.column_checks
            .entry(migration.into())
            .or_default()
            .push((table.into(), column.into()));
        self
    }

    /// Returns `true` if `migration` is statically skipped.
    pub fn is_static_skip(&self, migration: &str) -> bool {
        self.static_skips.contains(migration)
    }

    /// Decides whether `migration` executes against the current schema.
    pub fn decide(&self, conn: &Connection, migration: &str) -> Result<Decision> {
        if self.is_static_skip(migration) {
            debug!(migration, "static skip-list match");
            return Ok(Decision::Skip(SkipReason::Static));
        }

        let Some(checks) = self.column_checks.get(migration) else {
            return Ok(Decision::Execute);
        };

        for (table, column) in checks {
            if table_has_column(conn, table, column)? {
                debug!(migration, table, column, "legacy column present, executing");
                return Ok(Decision::Execute);
            }
        }

        let columns = checks
            .iter()
            .map(|(table, column)| format!("{table}.{column}"))
            .collect();
        debug!(migration, "legacy shape absent");
        Ok(Decision::Skip(SkipReason::LegacyShapeAbsent { columns }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_items(extra_column: Option<&str>) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let sql = match extra_column {
            Some(col) => format!("CREATE TABLE items (id TEXT PRIMARY KEY, {col} TEXT)"),
            None => "CREATE TABLE items (id TEXT PRIMARY KEY)".to_string(),
        };
        conn.execute_batch(&sql).unwrap();
        conn
    }

    #[test]
    fn test_empty_policy_executes_everything() {
        let conn = conn_with_items(None);
        let policy = SkipPolicy::new();
        assert_eq!(policy.decide(&conn, "001_any.sql").unwrap(), Decision::Execute);
    }

    #[test]
    fn test_static_skip() {
        let conn = conn_with_items(None);
        let policy = SkipPolicy::new().skip("002_bad.sql");
        assert_eq!(
            policy.decide(&conn, "002_bad.sql").unwrap(),
            Decision::Skip(SkipReason::Static)
        );
        assert_eq!(policy.decide(&conn, "003_ok.sql").unwrap(), Decision::Execute);
    }

    #[test]
    fn test_legacy_column_present_executes() {
        let conn = conn_with_items(Some("legacy_code"));
        let policy = SkipPolicy::new().skip_unless_column("005_drop.sql", "items", "legacy_code");
        assert_eq!(policy.decide(&conn, "005_drop.sql").unwrap(), Decision::Execute);
    }

    #[test]
    fn test_legacy_column_absent_skips() {
        let conn = conn_with_items(None);
        let policy = SkipPolicy::new().skip_unless_column("005_drop.sql", "items", "legacy_code");
        assert_eq!(
            policy.decide(&conn, "005_drop.sql").unwrap(),
            Decision::Skip(SkipReason::LegacyShapeAbsent {
                columns: vec!["items.legacy_code".to_string()],
            })
        );
    }

    #[test]
    fn test_legacy_column_with_different_case_executes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Items (id TEXT PRIMARY KEY, Legacy_Code TEXT)")
            .unwrap();
        let policy = SkipPolicy::new().skip_unless_column("005_drop.sql", "items", "legacy_code");
        assert_eq!(policy.decide(&conn, "005_drop.sql").unwrap(), Decision::Execute);
    }

    #[test]
    fn test_missing_table_counts_as_absent() {
        let conn = Connection::open_in_memory().unwrap();
        let policy = SkipPolicy::new().skip_unless_column("005_drop.sql", "items", "legacy_code");
        assert!(matches!(
            policy.decide(&conn, "005_drop.sql").unwrap(),
            Decision::Skip(SkipReason::LegacyShapeAbsent { .. })
        ));
    }

    #[test]
    fn test_any_present_column_forces_execution() {
        let conn = conn_with_items(Some("old_b"));
        let policy = SkipPolicy::new()
            .skip_unless_column("006_rebuild.sql", "items", "old_a")
            .skip_unless_column("006_rebuild.sql", "items", "old_b");
        assert_eq!(policy.decide(&conn, "006_rebuild.sql").unwrap(), Decision::Execute);
    }

    #[test]
    fn test_static_skip_wins_over_column_check() {
        let conn = conn_with_items(Some("legacy_code"));
        let policy = SkipPolicy::new()
            .skip("005_drop.sql")
            .skip_unless_column("005_drop.sql", "items", "legacy_code");
        assert_eq!(
            policy.decide(&conn, "005_drop.sql").unwrap(),
            Decision::Skip(SkipReason::Static)
        );
    }

    #[test]
    fn test_from_config() {
        let config = SkipPolicyConfig {
            static_skips: vec!["002_bad.sql".to_string()],
            legacy_column_checks: vec![LegacyColumnCheck {
                migration: "005_drop.sql".to_string(),
                table: "items".to_string(),
                column: "legacy_code".to_string(),
            }],
        };
        let policy = SkipPolicy::from_config(&config);
        assert!(policy.is_static_skip("002_bad.sql"));

        let conn = conn_with_items(Some("legacy_code"));
        assert_eq!(policy.decide(&conn, "005_drop.sql").unwrap(), Decision::Execute);
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::Static.to_string(), "static skip-list");
        let reason = SkipReason::LegacyShapeAbsent {
            columns: vec!["items.a".to_string(), "items.b".to_string()],
        };
        assert_eq!(reason.to_string(), "legacy column(s) already removed: items.a, items.b");
    }
}
