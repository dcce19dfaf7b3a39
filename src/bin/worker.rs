//! Hourglass worker - storage operations out of the main process
//!
//! Usage:
//!   hourglass-worker --supervised
//!   hourglass-worker run-migrations [--migrations-path <dir>] [--database-path <file>]
//!   hourglass-worker generate-schema [--database-path <file>]
//!
//! With `--supervised` the worker reads NDJSON requests on stdin until EOF.
//! Otherwise it runs one operation, prints the response JSON and exits
//! nonzero on failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use hourglass::bridge::environment::{DATABASE_PATH_VAR, MODE_VAR};
use hourglass::bridge::protocol::{operations, OperationRequest, RequestContext, RunMigrationsParams};
use hourglass::config::{load_env_file, AppMode, Settings};
use hourglass::logging;
use hourglass::worker::{runtime, Dispatcher, WorkerConfig};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hourglass-worker")]
#[command(about = "Hourglass worker - runs migrations and schema tasks out of process")]
#[command(version)]
struct Cli {
    /// Serve requests from a supervising process over stdin/stdout
    #[arg(long)]
    supervised: bool,

    /// Execution mode (overrides HOURGLASS_MODE and the config file)
    #[arg(long, global = true)]
    mode: Option<AppMode>,

    /// SQLite database file
    #[arg(long, global = true)]
    database_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    RunMigrations {
        /// Directory holding NNNN_name.sql files
        #[arg(long)]
        migrations_path: Option<PathBuf>,
    },

    /// Report the declared schema and the tables present in storage
    GenerateSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match (&cli.command, cli.supervised) {
        (None, true) => run_supervised(&cli).await.map(|()| true),
        (Some(_), true) => {
            eprintln!("Error: --supervised does not take an operation");
            return ExitCode::from(2);
        }
        (Some(command), false) => run_standalone(&cli, command),
        (None, false) => {
            eprintln!("Error: nothing to do. Pass --supervised or an operation (see --help)");
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Build the worker configuration. Command-line flags win over the
/// environment, which wins over the config file.
fn worker_config(cli: &Cli, settings: &Settings) -> anyhow::Result<WorkerConfig> {
    let config = WorkerConfig::from_lookup(settings, |key| {
        let flag = match key {
            MODE_VAR => cli.mode.map(|mode| mode.as_str().to_string()),
            DATABASE_PATH_VAR => cli
                .database_path
                .as_ref()
                .map(|path| path.display().to_string()),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    })
    .context("failed to resolve worker configuration")?;
    Ok(config)
}

async fn run_supervised(cli: &Cli) -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;

    let (outbox, inbox) = mpsc::unbounded_channel();
    logging::init_worker_forwarding(outbox.clone(), &settings.logging.level);

    let config = worker_config(cli, &settings)?;
    let dispatcher = Arc::new(Dispatcher::new(config));

    runtime::serve(
        dispatcher,
        tokio::io::stdin(),
        tokio::io::stdout(),
        outbox,
        inbox,
    )
    .await
    .context("worker channel failed")
}

fn run_standalone(cli: &Cli, command: &Commands) -> anyhow::Result<bool> {
    let settings = Settings::load().context("failed to load settings")?;
    let mode = match cli.mode {
        Some(mode) => mode,
        None => settings.mode()?,
    };
    let env_file = load_env_file(mode);

    let config = worker_config(cli, &settings)?;
    let _guard = logging::init_logging(&settings, config.mode, &config.session_id)?;
    if env_file.is_none() {
        tracing::warn!(mode = %mode, "no environment file found, using defaults");
    }

    let (kind, params) = match command {
        Commands::RunMigrations { migrations_path } => {
            let params = RunMigrationsParams {
                migrations_path: migrations_path.clone(),
                database_path: None,
            };
            (operations::RUN_MIGRATIONS, serde_json::to_value(params)?)
        }
        Commands::GenerateSchema => (operations::GENERATE_SCHEMA, Value::Null),
    };

    let request = OperationRequest {
        id: Uuid::new_v4().to_string(),
        kind: kind.to_string(),
        issued_at: Utc::now(),
        context: RequestContext {
            mode: config.mode,
            session_id: config.session_id.clone(),
        },
        params,
    };

    let response = Dispatcher::new(config).dispatch(&request);
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(response.is_success())
}
