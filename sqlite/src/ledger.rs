//! Migration ledger access.
//!
//! A ledger entry means "this migration's effects, or an explicit
//! equivalent, are already reflected in the schema". Entries are inserted
//! the moment a migration completes or is deliberately skipped, and are
//! never updated or deleted by the engine.

use std::collections::HashSet;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::error::Result;
use crate::schema::{LEDGER_DDL, LEDGER_TABLE, table_exists};

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Migration file name.
    pub name: String,
    /// RFC 3339 UTC timestamp of when it was recorded.
    pub applied_at: String,
}

/// Read/write view of the ledger table on one connection.
pub struct Ledger<'c> {
    conn: &'c Connection,
}

impl<'c> Ledger<'c> {
    /// Wraps a connection. Does not touch the database.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Creates the ledger table if absent.
    pub fn ensure(&self) -> Result<()> {
        self.conn.execute_batch(LEDGER_DDL)?;
        Ok(())
    }

    /// Returns `true` if the ledger table exists.
    pub fn exists(&self) -> Result<bool> {
        table_exists(self.conn, LEDGER_TABLE)
    }

    /// Returns every entry ordered by name.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, applied_at FROM _migrations ORDER BY name")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    name: row.get(0)?,
                    applied_at: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Returns the set of applied migration names.
    pub fn applied_names(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM _migrations")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    /// Records `name` as applied now.
    ///
    /// # Errors
    ///
    /// Fails with a constraint violation if `name` is already recorded.
    pub fn record(&self, name: &str) -> Result<LedgerEntry> {
        let applied_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.conn.execute(
            "INSERT INTO _migrations (name, applied_at) VALUES (?1, ?2)",
            params![name, applied_at],
        )?;
        Ok(LedgerEntry {
            name: name.to_string(),
            applied_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Ledger::new(&conn).ensure().unwrap();
        conn
    }

    #[test]
    fn test_exists_before_and_after_ensure() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new(&conn);
        assert!(!ledger.exists().unwrap());
        ledger.ensure().unwrap();
        assert!(ledger.exists().unwrap());
    }

    #[test]
    fn test_record_and_entries() {
        let conn = ledger_conn();
        let ledger = Ledger::new(&conn);
        ledger.record("002_b.sql").unwrap();
        let first = ledger.record("001_a.sql").unwrap();

        assert!(first.applied_at.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&first.applied_at).is_ok());

        let names: Vec<_> = ledger.entries().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["001_a.sql", "002_b.sql"]);
        let applied = ledger.applied_names().unwrap();
        assert_eq!(applied.len(), 2);
        assert!(applied.contains("001_a.sql"));
        assert!(!applied.contains("003_c.sql"));
    }

    #[test]
    fn test_record_twice_fails() {
        let conn = ledger_conn();
        let ledger = Ledger::new(&conn);
        ledger.record("001_a.sql").unwrap();
        assert!(ledger.record("001_a.sql").is_err());
        assert_eq!(ledger.entries().unwrap().len(), 1);
    }
}
