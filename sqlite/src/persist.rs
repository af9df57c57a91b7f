//! Loading tenant databases into memory and writing them back to disk.
//!
//! A tenant database lives in memory while open. [`load_connection`] reads
//! the file image once; [`export_connection`] writes the full image back
//! through a temporary file in the same directory that is then renamed over
//! the target, so readers never observe a partially written file.

use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;

use rusqlite::{Connection, MAIN_DB};
use tracing::debug;

use crate::error::{Result, TenantDbError};

/// Opens an in-memory connection holding the contents of `path`.
///
/// Returns the connection and whether a file existed. A missing or empty
/// file yields an empty database. The file is only read; nothing is created.
pub fn load_connection(path: &Path) -> Result<(Connection, bool)> {
    let mut conn = Connection::open_in_memory()?;

    let existed = match fs::metadata(path) {
        Ok(meta) => {
            let len = usize::try_from(meta.len()).unwrap_or(usize::MAX);
            if len > 0 {
                let file = File::open(path).map_err(|e| TenantDbError::io(path, e))?;
                conn.deserialize_read_exact(MAIN_DB, BufReader::new(file), len, false)?;
            }
            debug!(path = %path.display(), bytes = len, "loaded database image");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(TenantDbError::io(path, e)),
    };

    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok((conn, existed))
}

/// Writes the full image of `conn` to `path`, replacing it atomically.
///
/// Missing parent directories are created. Returns the number of bytes
/// written.
pub fn export_connection(conn: &Connection, path: &Path) -> Result<usize> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| TenantDbError::io(dir, e))?;

    let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tenantdb-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| TenantDbError::io(dir, e))?;

    // A database with no pages has no image; write an empty file.
    let written = if page_count == 0 {
        0
    } else {
        let image = conn.serialize(MAIN_DB)?;
        tmp.write_all(&image).map_err(|e| TenantDbError::io(tmp.path(), e))?;
        image.len()
    };

    tmp.as_file().sync_all().map_err(|e| TenantDbError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| TenantDbError::io(path, e.error))?;

    debug!(path = %path.display(), bytes = written, "exported database image");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.db");

        let (conn, existed) = load_connection(&path).unwrap();
        assert!(!existed);
        assert!(!path.exists());

        let tables: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn test_export_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("acme.db");

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT); INSERT INTO t VALUES ('kept');")
            .unwrap();
        let written = export_connection(&conn, &path).unwrap();
        assert!(written > 0);
        assert_eq!(fs::metadata(&path).unwrap().len() as usize, written);

        let (loaded, existed) = load_connection(&path).unwrap();
        assert!(existed);
        let v: String = loaded.query_row("SELECT v FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(v, "kept");
    }

    #[test]
    fn test_export_is_readable_by_file_connection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.db");

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (42);")
            .unwrap();
        export_connection(&conn, &path).unwrap();

        let on_disk = Connection::open(&path).unwrap();
        let n: i64 = on_disk.query_row("SELECT n FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn test_export_empty_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.db");

        let conn = Connection::open_in_memory().unwrap();
        export_connection(&conn, &path).unwrap();
        assert!(path.exists());

        let (_, existed) = load_connection(&path).unwrap();
        assert!(existed);
    }

    #[test]
    fn test_export_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.db");

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();
        export_connection(&conn, &path).unwrap();
        conn.execute_batch("UPDATE t SET n = 2;").unwrap();
        export_connection(&conn, &path).unwrap();

        let (loaded, _) = load_connection(&path).unwrap();
        let n: i64 = loaded.query_row("SELECT n FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 2);

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
