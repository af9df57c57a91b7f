//! Ledger DDL and schema introspection helpers.
//!
//! The ledger table records every migration whose effects are reflected in
//! a tenant database. Introspection queries back the skip policy's
//! legacy-column checks.

use rusqlite::{Connection, params};

use crate::error::Result;

/// Name of the migration ledger table.
pub const LEDGER_TABLE: &str = "_migrations";

/// Creates the ledger table if it does not exist. Never recreates it.
pub(crate) const LEDGER_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    name TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Returns `true` if `table` exists in the `main` schema.
///
/// Names compare case-insensitively, as SQLite identifiers do.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Returns `true` if `table` exists and has a column named `column`.
///
/// A missing table reports `false`. Both names compare case-insensitively.
pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_ddl_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEDGER_DDL).unwrap();
        conn.execute(
            "INSERT INTO _migrations (name, applied_at) VALUES ('001.sql', 'x')",
            [],
        )
        .unwrap();
        conn.execute_batch(LEDGER_DDL).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_ledger_name_is_primary_key() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEDGER_DDL).unwrap();
        let insert = "INSERT INTO _migrations (name, applied_at) VALUES ('001.sql', 'x')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_table_exists() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!table_exists(&conn, "items").unwrap());
        conn.execute_batch("CREATE TABLE items (id TEXT PRIMARY KEY)").unwrap();
        assert!(table_exists(&conn, "items").unwrap());
    }

    #[test]
    fn test_table_has_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE items (id TEXT PRIMARY KEY, legacy_code TEXT)")
            .unwrap();
        assert!(table_has_column(&conn, "items", "legacy_code").unwrap());
        assert!(!table_has_column(&conn, "items", "title").unwrap());
        assert!(!table_has_column(&conn, "missing", "id").unwrap());

        conn.execute_batch("ALTER TABLE items DROP COLUMN legacy_code").unwrap();
        assert!(!table_has_column(&conn, "items", "legacy_code").unwrap());
    }

    #[test]
    fn test_names_compare_case_insensitively() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Items (id TEXT PRIMARY KEY, Legacy_Code TEXT)")
            .unwrap();
        assert!(table_exists(&conn, "items").unwrap());
        assert!(table_exists(&conn, "ITEMS").unwrap());
        assert!(table_has_column(&conn, "items", "legacy_code").unwrap());
        assert!(table_has_column(&conn, "ITEMS", "LEGACY_CODE").unwrap());
    }
}
