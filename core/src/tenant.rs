//! Tenant identifier validation and file-path derivation.
//!
//! A tenant's database file is located by substituting its identifier into
//! the configured file-name pattern and joining the result onto the database
//! root. The mapping is pure: the same identifier always yields the same
//! path, and no two valid identifiers share one.
//!
//! # Examples
//!
//! ```
//! use std::path::Path;
//! use tenantdb_core::tenant_file_path;
//!
//! let path = tenant_file_path(Path::new("/var/lib/quiz"), "{tenantId}.db", "acme").unwrap();
//! assert_eq!(path, Path::new("/var/lib/quiz/acme.db"));
//! ```

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Placeholder substituted with the tenant identifier.
pub const TENANT_PLACEHOLDER: &str = "{tenantId}";

/// Validates that a tenant identifier is safe to embed in a file name.
///
/// Identifiers must be non-empty, must not start with `.`, and may contain
/// only ASCII alphanumerics, `-`, `_` and `.`. Path separators and `..` are
/// therefore impossible.
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    if tenant_id.is_empty() || tenant_id.starts_with('.') {
        return Err(ConfigError::InvalidTenantId(tenant_id.to_string()));
    }
    if !tenant_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ConfigError::InvalidTenantId(tenant_id.to_string()));
    }
    Ok(())
}

/// Validates that a file-name pattern contains the tenant placeholder.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if !pattern.contains(TENANT_PLACEHOLDER) {
        return Err(ConfigError::InvalidPattern(pattern.to_string()));
    }
    Ok(())
}

/// Derives the database file path for `tenant_id`.
///
/// Every occurrence of `{tenantId}` in `pattern` is replaced, and the result
/// is joined onto `root`. The pattern may contain sub-directories
/// (e.g. `{tenantId}/data.db`).
///
/// # Errors
///
/// Returns [`ConfigError::InvalidTenantId`] or [`ConfigError::InvalidPattern`]
/// if either input fails validation.
pub fn tenant_file_path(root: &Path, pattern: &str, tenant_id: &str) -> Result<PathBuf> {
    validate_pattern(pattern)?;
    validate_tenant_id(tenant_id)?;
    Ok(root.join(pattern.replace(TENANT_PLACEHOLDER, tenant_id)))
}
