//! Migration file discovery.
//!
//! Migrations are plain UTF-8 `*.sql` files in one directory. The file name
//! is both the ledger key and the sort key: files apply in ascending
//! lexicographic order of their names, so zero-padded sequence prefixes are
//! the caller's responsibility. Files are discovered fresh on every run.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tenantdb_core::ConfigError;

use crate::error::{Result, TenantDbError};

/// Suffix a file name must end with to be treated as a migration.
pub const MIGRATION_SUFFIX: &str = ".sql";

const BOM: char = '\u{feff}';

/// Removes a leading byte-order mark and any stray BOM codepoints.
///
/// # Examples
///
/// ```
/// use tenantdb_sqlite::normalize_sql;
///
/// assert_eq!(normalize_sql("\u{feff}CREATE TABLE t (id TEXT);"), "CREATE TABLE t (id TEXT);");
/// assert_eq!(normalize_sql("SELECT 1;\u{feff}"), "SELECT 1;");
/// ```
pub fn normalize_sql(raw: &str) -> String {
    raw.trim_start_matches(BOM).replace(BOM, "")
}

/// One migration file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    name: String,
    path: PathBuf,
}

impl MigrationFile {
    /// File name, used as sort key and ledger identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the SQL text with byte-order marks removed.
    ///
    /// # Errors
    ///
    /// Returns [`TenantDbError::Io`] if the file cannot be read, or
    /// [`TenantDbError::Encoding`] if it is not valid UTF-8.
    pub fn read_sql(&self) -> Result<String> {
        let bytes = std::fs::read(&self.path).map_err(|e| TenantDbError::io(&self.path, e))?;
        let text = String::from_utf8(bytes).map_err(|_| TenantDbError::Encoding {
            name: self.name.clone(),
        })?;
        Ok(normalize_sql(&text))
    }

    /// SHA-256 hex digest of the raw file bytes.
    pub fn checksum(&self) -> Result<String> {
        let bytes = std::fs::read(&self.path).map_err(|e| TenantDbError::io(&self.path, e))?;
        let hash = Sha256::digest(&bytes);
        Ok(format!("{:x}", hash))
    }
}

/// A directory of migration files.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    /// Resolves `dir` to an absolute path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSetting`] if `dir` is empty.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingSetting("migrations_dir").into());
        }
        let dir = std::path::absolute(dir).map_err(|e| TenantDbError::io(dir, e))?;
        Ok(Self { dir })
    }

    /// Absolute migrations directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory if it is missing.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| TenantDbError::io(&self.dir, e))
    }

    /// Lists migration files sorted by name.
    ///
    /// Only regular files whose UTF-8 name ends in [`MIGRATION_SUFFIX`] are
    /// returned. A missing directory yields an empty list.
    pub fn discover(&self) -> Result<Vec<MigrationFile>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TenantDbError::io(&self.dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TenantDbError::io(&self.dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(MIGRATION_SUFFIX) {
                files.push(MigrationFile { name, path });
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}
