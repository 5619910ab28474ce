//! # Bookings Ingest CLI (`bookings-ingest`)
//!
//! ## Usage
//!
//! ```bash
//! bookings-ingest [--config ./config/bookings.toml] [--progress human] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bookings-ingest migrate` | Apply pending schema migrations (SQLite) |
//! | `bookings-ingest migrate --print` | Print Postgres DDL for a hosted store |
//! | `bookings-ingest ingest [SOURCE]` | Ingest a file or a directory of files |
//! | `bookings-ingest stats` | Row counts per collection |
//!
//! Storage credentials come from the environment: `BOOKINGS_DATABASE_URL`
//! for SQLite, or `SUPABASE_URL` / `SUPABASE_PROJECT_REF` with
//! `SUPABASE_SERVICE_ROLE_KEY` for a hosted store.
//!
//! ## Exit status
//!
//! `0` once a run completes, even when rows were rejected or some files
//! failed. `1` on a configuration error (no credentials, no source), in
//! which case nothing is read.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bookings_ingest::config::{self, StoreCredentials};
use bookings_ingest::error::IngestError;
use bookings_ingest::pipeline::{Coordinator, IngestSettings};
use bookings_ingest::progress::ProgressMode;
use bookings_ingest::store::{self, SqliteStore};
use bookings_ingest::{migrate, stats};

/// Bookings Ingest: load shipping booking extracts into `bookings` and
/// `detail_sequences`.
#[derive(Parser)]
#[command(name = "bookings-ingest", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/bookings.toml` when present; built-in
    /// defaults otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress output on stderr. Defaults to `human` on a TTY, `off`
    /// otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply versioned schema migrations.
    ///
    /// Ingestion never creates tables; run this once per database. Running
    /// it again is a no-op.
    Migrate {
        /// Print the Postgres DDL instead of applying anything.
        #[arg(long)]
        print: bool,
    },

    /// Ingest a source file or directory.
    ///
    /// Directories are walked for files matching `ingest.include_globs`
    /// and processed in path order.
    Ingest {
        /// File or directory. Falls back to `ingest.default_source`.
        source: Option<PathBuf>,

        /// Tokenize and build only; report counts without touching storage.
        #[arg(long)]
        dry_run: bool,

        /// Override `ingest.chunk_size` (1..=1000).
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Show row counts per collection.
    Stats,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Migrate { print: true } => {
            print!("{}", migrate::render_postgres());
        }
        Commands::Migrate { print: false } => {
            let creds = StoreCredentials::from_env()?;
            let StoreCredentials::Sqlite { url } = &creds else {
                bail!("migrations for a hosted store are applied by hand: use `migrate --print`");
            };
            let store = SqliteStore::connect(url).await?;
            let applied = migrate::run_migrations(store.pool()).await?;
            store.close().await;
            println!("migrate");
            println!("  applied: {:?}", applied);
            println!("ok");
        }
        Commands::Ingest {
            source,
            dry_run,
            chunk_size,
        } => {
            if let Some(n) = chunk_size {
                cfg.ingest.chunk_size = n;
                config::validate(&cfg)?;
            }
            let creds = StoreCredentials::from_env()?;
            let source = source
                .or_else(|| cfg.ingest.default_source.clone())
                .ok_or_else(|| {
                    IngestError::FatalConfiguration(
                        "no source given and ingest.default_source is not set".to_string(),
                    )
                })?;
            if !source.exists() {
                return Err(IngestError::FatalConfiguration(format!(
                    "source path does not exist: {}",
                    source.display()
                ))
                .into());
            }

            let reporter = cli
                .progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = Arc::clone(&cancel);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("interrupt received, stopping at the next chunk boundary");
                        cancel.store(true, Ordering::SeqCst);
                    }
                });
            }

            let settings = IngestSettings::from_config(&cfg);
            let report = if dry_run {
                Coordinator::dry_run(settings)
                    .with_progress(reporter.as_ref())
                    .with_cancel(&cancel)
                    .run(&source)
                    .await?
            } else {
                let store =
                    store::connect(&creds, Duration::from_secs(cfg.loader.timeout_secs)).await?;
                tracing::info!(backend = creds.backend(), "connected to store");
                let coordinator = Coordinator::new(store.as_ref(), settings)
                    .with_progress(reporter.as_ref())
                    .with_cancel(&cancel);
                coordinator.run(&source).await?
            };
            print!("{}", report);
        }
        Commands::Stats => {
            let creds = StoreCredentials::from_env()?;
            let store =
                store::connect(&creds, Duration::from_secs(cfg.loader.timeout_secs)).await?;
            stats::run_stats(store.as_ref(), creds.backend()).await?;
        }
    }

    Ok(())
}
