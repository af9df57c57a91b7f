use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tenantdb_core::TenantDbConfig;
use tenantdb_sqlite::{Params, TenantRegistry};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tenantdb")]
#[command(about = "Migrate and inspect per-tenant SQLite databases")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    source: ConfigArgs,
    /// Log debug diagnostics to stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding tenant database files.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Directory of *.sql migration files.
    #[arg(long, global = true)]
    migrations: Option<PathBuf>,
    /// File-name pattern containing {tenantId}.
    #[arg(long, global = true)]
    pattern: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open tenants, applying any pending migrations.
    Migrate(MigrateArgs),
    /// Show the migration state of one tenant.
    Status(TenantArgs),
    /// Execute a batch of SQL against a tenant and persist it.
    Exec(ExecArgs),
    /// Run a query and print the rows as JSON.
    Query(QueryArgs),
    /// Write the resolved configuration as YAML.
    Config(ConfigOutputArgs),
}

#[derive(Debug, Args)]
struct MigrateArgs {
    /// Tenant identifiers.
    #[arg(long = "tenant", required = true)]
    tenants: Vec<String>,
}

#[derive(Debug, Args)]
struct TenantArgs {
    /// Tenant identifier.
    #[arg(long)]
    tenant: String,
}

#[derive(Debug, Args)]
struct ExecArgs {
    /// Tenant identifier.
    #[arg(long)]
    tenant: String,
    /// SQL text to execute.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    sql: Option<String>,
    /// File containing the SQL to execute.
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct QueryArgs {
    /// Tenant identifier.
    #[arg(long)]
    tenant: String,
    /// SQL query.
    #[arg(long)]
    sql: String,
    /// Positional parameter; JSON literals are decoded, anything else binds as text.
    #[arg(long = "param", conflicts_with = "named")]
    params: Vec<String>,
    /// Named parameters as a JSON object.
    #[arg(long)]
    named: Option<String>,
}

#[derive(Debug, Args)]
struct ConfigOutputArgs {
    /// Output YAML path.
    #[arg(long)]
    output: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Migrate(args) => run_migrate(&cli.source, args),
        Command::Status(args) => run_status(&cli.source, args),
        Command::Exec(args) => run_exec(&cli.source, args),
        Command::Query(args) => run_query(&cli.source, args),
        Command::Config(args) => run_config(&cli.source, args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose {
        "tenantdb=debug,tenantdb_sqlite=debug,tenantdb_core=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Builds the configuration from `--config` and the individual overrides.
fn resolve_config(args: &ConfigArgs) -> Result<TenantDbConfig, String> {
    let mut config = match &args.config {
        Some(path) => TenantDbConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        None => {
            let (Some(root), Some(migrations)) = (&args.root, &args.migrations) else {
                return Err(
                    "Specify --config, or both --root and --migrations".to_string(),
                );
            };
            TenantDbConfig::new(root, migrations)
        }
    };

    if let Some(root) = &args.root {
        config.database_root = root.clone();
    }
    if let Some(migrations) = &args.migrations {
        config.migrations_dir = migrations.clone();
    }
    if let Some(pattern) = &args.pattern {
        config.file_pattern = pattern.clone();
    }

    config
        .validate()
        .map_err(|e| format!("Invalid configuration: {e}"))?;
    Ok(config)
}

fn open_registry(args: &ConfigArgs) -> Result<TenantRegistry, String> {
    let config = resolve_config(args)?;
    debug!(root = %config.database_root.display(), "opening registry");
    TenantRegistry::new(config).map_err(|e| format!("Failed to create registry: {e}"))
}

/// Closes every tenant, reporting failures after the command's own result.
fn finish(registry: TenantRegistry, result: Result<(), String>) -> Result<(), String> {
    let closed = registry
        .close_all()
        .into_result()
        .map_err(|e| format!("Shutdown failed: {e}"));
    result.and(closed.map(|_| ()))
}

fn run_migrate(source: &ConfigArgs, args: MigrateArgs) -> Result<(), String> {
    let registry = open_registry(source)?;
    let result = args.tenants.iter().try_for_each(|tenant| {
        let handle = registry
            .get_connection(tenant)
            .map_err(|e| format!("Failed to open tenant '{tenant}': {e}"))?;
        let report = handle.migration_report();
        println!(
            "{tenant}: {} applied, {} skipped, {} already applied",
            report.applied.len(),
            report.skipped.len(),
            report.already_applied
        );
        for name in &report.applied {
            println!("  applied {name}");
        }
        for skipped in &report.skipped {
            println!("  skipped {} ({})", skipped.name, skipped.reason);
        }
        Ok(())
    });
    finish(registry, result)
}

fn run_status(source: &ConfigArgs, args: TenantArgs) -> Result<(), String> {
    let registry = open_registry(source)?;
    let result = registry
        .get_connection(&args.tenant)
        .and_then(|handle| handle.with_connection(|conn| registry.migrator().status(conn)))
        .map_err(|e| format!("Failed to read status for '{}': {e}", args.tenant))
        .map(|states| {
            println!("Migration status for '{}':", args.tenant);
            for state in states {
                let marker = match (&state.applied_at, state.on_disk) {
                    (Some(_), true) => "applied",
                    (Some(_), false) => "orphaned",
                    (None, _) => "pending",
                };
                println!(
                    "  {marker:<8} {}  {}",
                    state.name,
                    state.applied_at.as_deref().unwrap_or("-")
                );
            }
        });
    finish(registry, result)
}

fn run_exec(source: &ConfigArgs, args: ExecArgs) -> Result<(), String> {
    let sql = match (args.sql, &args.file) {
        (Some(sql), _) => sql,
        (None, Some(path)) => fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {e}", path.display()))?,
        (None, None) => return Err("Specify --sql or --file".to_string()),
    };

    let registry = open_registry(source)?;
    let result = registry
        .get_connection(&args.tenant)
        .and_then(|handle| handle.exec(&sql))
        .map_err(|e| format!("Exec failed for '{}': {e}", args.tenant));
    finish(registry, result)
}

fn run_query(source: &ConfigArgs, args: QueryArgs) -> Result<(), String> {
    let params = query_params(&args)?;
    let registry = open_registry(source)?;
    let result = registry
        .get_connection(&args.tenant)
        .and_then(|handle| {
            let rows = handle.prepare(&args.sql)?.all(params)?;
            Ok(rows)
        })
        .map_err(|e| format!("Query failed for '{}': {e}", args.tenant))
        .and_then(|rows| {
            let json = serde_json::to_string_pretty(&rows)
                .map_err(|e| format!("Failed to serialize rows: {e}"))?;
            println!("{json}");
            Ok(())
        });
    finish(registry, result)
}

fn query_params(args: &QueryArgs) -> Result<Params, String> {
    if let Some(raw) = &args.named {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| format!("Invalid --named JSON: {e}"))?;
        if !value.is_object() {
            return Err("--named must be a JSON object".to_string());
        }
        return Ok(Params::from(value));
    }
    Ok(Params::positional(args.params.iter().map(|raw| parse_param(raw))))
}

fn parse_param(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn run_config(source: &ConfigArgs, args: ConfigOutputArgs) -> Result<(), String> {
    let config = resolve_config(source)?;
    config
        .save(&args.output)
        .map_err(|e| format!("Failed to write '{}': {e}", args.output.display()))?;
    println!("Wrote configuration to '{}'", args.output.display());
    Ok(())
}
