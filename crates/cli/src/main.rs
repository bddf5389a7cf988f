//! `refrange-migrate` CLI entry-point.
//!
//! Available sub-commands:
//! - `migrate`  — apply pending migrations (the default).
//! - `status`   — list applied and pending migrations.
//! - `validate` — check a migrations directory without touching a database.
//!
//! Any failure exits with status 1 after printing the full error chain.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use db::pool::{close_pool, create_pool};
use db::{DbPool, PgMigrationStore, PoolConfig, DEFAULT_RECORD_TABLE};
use migrator::{MigrationRunner, MigrationSet, MigrationState, RunnerConfig};

#[derive(Parser)]
#[command(
    name = "refrange-migrate",
    about = "Apply versioned SQL migrations to PostgreSQL",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    database: DatabaseArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Apply every pending migration.
    Migrate,
    /// Show which migrations are applied and which are pending.
    Status {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load and check the migrations directory without connecting.
    Validate,
}

#[derive(Args)]
struct SourceArgs {
    /// Directory containing `<version>_<name>.up.sql` files.
    #[arg(long, global = true, env = "MIGRATIONS_DIR", default_value = "migrations")]
    migrations_dir: PathBuf,
}

#[derive(Args)]
struct DatabaseArgs {
    /// Full connection URL. When absent, DB_HOST / DB_PORT / DB_USER /
    /// DB_PASSWORD / DB_NAME / SSL_MODE are used.
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Table that records applied migrations.
    #[arg(long, global = true, env = "MIGRATIONS_TABLE", default_value = DEFAULT_RECORD_TABLE)]
    record_table: String,

    /// Give up if another runner holds the migration lock this long.
    #[arg(long, global = true, env = "MIGRATIONS_LOCK_TIMEOUT_SECS", default_value_t = 30)]
    lock_timeout_secs: u64,

    #[arg(long, global = true, default_value_t = 2)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env first so RUST_LOG and the clap `env` fallbacks can come from it.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = dotenv {
        if !err.not_found() {
            warn!("could not load .env file: {err}");
        }
    }

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("❌ {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let set = load_migrations(&cli.source.migrations_dir)?;

    match cli.command.unwrap_or(Command::Migrate) {
        Command::Migrate => {
            let (pool, mut store) = connect(&cli.database).await?;
            let runner = runner(&cli.database);

            let result = runner.apply_pending(&mut store, &set).await;
            disconnect(pool, store).await;

            let applied = result.context("migration failed")?;
            if applied == 0 {
                info!("Database already up to date");
            } else {
                info!("Applied {applied} migrations successfully");
            }
        }
        Command::Status { json } => {
            let (pool, mut store) = connect(&cli.database).await?;
            let record_table = store.record_table().to_owned();

            let result = runner(&cli.database).status(&mut store, &set).await;
            disconnect(pool, store).await;

            let report = result.context("could not read migration status")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for migration in &report.migrations {
                    match &migration.state {
                        MigrationState::Applied { applied_at } => {
                            println!("applied  {:>14}  {}  ({applied_at})", migration.version, migration.name)
                        }
                        MigrationState::Pending => {
                            println!("pending  {:>14}  {}", migration.version, migration.name)
                        }
                    }
                }
                for version in &report.unknown_applied {
                    println!("unknown  {version:>14}  (applied, not in {})", cli.source.migrations_dir.display());
                }
                println!("{} pending (history in {record_table})", report.pending_count());
            }
        }
        Command::Validate => {
            println!(
                "✅ {} migrations are valid. Latest version: {}",
                set.len(),
                set.latest_version().map_or_else(|| "none".to_string(), |v| v.to_string())
            );
        }
    }

    Ok(())
}

fn load_migrations(dir: &Path) -> anyhow::Result<MigrationSet> {
    migrator::load_dir(dir).with_context(|| format!("cannot load migrations from {}", dir.display()))
}

fn runner(args: &DatabaseArgs) -> MigrationRunner {
    MigrationRunner::new(RunnerConfig {
        lock_timeout: Duration::from_secs(args.lock_timeout_secs),
        ..RunnerConfig::default()
    })
}

async fn connect(args: &DatabaseArgs) -> anyhow::Result<(DbPool, PgMigrationStore)> {
    let options = db::connect_options(args.database_url.as_deref())
        .context("invalid database configuration")?;
    let config = PoolConfig { max_connections: args.max_connections, ..PoolConfig::default() };
    let pool = create_pool(options, &config)
        .await
        .context("failed to connect to database")?;
    let store = PgMigrationStore::acquire(&pool, &args.record_table)
        .await
        .context("failed to open migration store")?;
    Ok((pool, store))
}

async fn disconnect(pool: DbPool, store: PgMigrationStore) {
    if let Err(err) = store.close().await {
        warn!("failed to close migration connection: {err}");
    }
    close_pool(&pool).await;
}
