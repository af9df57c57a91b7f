//! Per-tenant SQLite databases with ordered, ledger-tracked migrations.
//!
//! Every tenant gets its own database file. A file is loaded into an
//! in-memory engine when the tenant is first used, migrated to the current
//! schema, and written back to disk after every write.
//!
//! # Architecture
//!
//! - **`registry`**: [`TenantRegistry`] maps tenant identifiers to cached
//!   [`TenantHandle`]s and closes them all on shutdown.
//! - **`handle`**: one open tenant database, its write lock and its export
//!   policy.
//! - **`migration`**: [`Migrator`] applies `*.sql` files in name order,
//!   recording each in the `_migrations` ledger (**`ledger`**), consulting
//!   the skip-list policy (**`skip`**) and reading files through
//!   **`source`**.
//! - **`adapter`**: parameter normalization and row mapping behind
//!   [`Statement`].
//! - **`persist`**: loading file images into memory and atomic export.
//!
//! # Quick start
//!
//! ```no_run
//! use serde_json::json;
//! use tenantdb_core::TenantDbConfig;
//! use tenantdb_sqlite::TenantRegistry;
//!
//! let config = TenantDbConfig::new("data", "migrations");
//! let registry = TenantRegistry::new(config).unwrap();
//!
//! let acme = registry.get_connection("acme").unwrap();
//! acme.prepare("INSERT INTO widgets (id) VALUES (:id)").unwrap()
//!     .run(json!({"id": "w1"})).unwrap();
//!
//! for row in acme.prepare("SELECT id FROM widgets").unwrap().all(()).unwrap() {
//!     println!("{}", row.to_json());
//! }
//!
//! registry.close_all().into_result().unwrap();
//! ```
//!
//! # Skip-list policy
//!
//! Some migrations must not run verbatim against databases created by
//! older versions. A [`SkipPolicy`] marks them applied without executing
//! them, either unconditionally or when a legacy column is already gone.

mod adapter;
mod error;
mod handle;
mod ledger;
mod migration;
mod persist;
mod registry;
mod schema;
mod skip;
mod source;

pub use adapter::{IntoValue, Params, Row, RunInfo, Statement, json_to_value, value_to_json};
pub use error::{CloseFailure, Result, TenantDbError};
pub use handle::TenantHandle;
pub use ledger::{Ledger, LedgerEntry};
pub use migration::{MigrationReport, MigrationState, Migrator, SkippedMigration};
pub use persist::{export_connection, load_connection};
pub use registry::{CloseReport, TenantRegistry};
pub use schema::{LEDGER_TABLE, table_exists, table_has_column};
pub use skip::{Decision, SkipPolicy, SkipReason};
pub use source::{MIGRATION_SUFFIX, MigrationFile, MigrationSource, normalize_sql};
