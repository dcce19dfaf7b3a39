//! Hourglass CLI - application host commands
//!
//! Usage:
//!   hourglass migrate [--in-process]
//!   hourglass schema [--in-process]
//!   hourglass user <list|get|add|update|delete> ...
//!   hourglass ipc <channel> [json-arg]
//!
//! Every command that touches storage first runs migrations through the
//! worker and closes it before opening the main connection.
//!
//! Examples:
//!   hourglass migrate
//!   hourglass user add ada ada@example.com
//!   hourglass ipc db/user/getInfoById '{"id": 1}'

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hourglass::bridge::protocol::GenerateSchemaResult;
use hourglass::bridge::{
    resolve_worker_path, BridgeOptions, DbOperations, DirectOperations, Supervisor,
};
use hourglass::config::{load_env_file, Settings};
use hourglass::db::{NewUser, UserUpdate};
use hourglass::worker::Dispatcher;
use hourglass::{ipc, logging, App, StartupPlan};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hourglass")]
#[command(about = "Hourglass - application host with an out-of-process migration worker")]
#[command(version)]
struct Cli {
    /// Config file (defaults to HOURGLASS_CONFIG, ./hourglass.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run storage operations in this process instead of spawning the worker
    #[arg(long, global = true)]
    in_process: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations and report what was applied
    Migrate,

    /// Show the declared schema and the tables present in storage
    Schema,

    /// Manage user records
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Invoke a renderer channel handler and print its response
    Ipc {
        /// Channel name, e.g. db/user/getList
        channel: String,

        /// JSON argument
        #[arg(default_value = "null")]
        arg: String,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// List all users
    List,

    /// Show one user
    Get { id: i64 },

    /// Add a user
    Add { username: String, email: String },

    /// Change a user's username and/or email
    Update {
        id: i64,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },

    /// Delete a user
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };
    let mode = settings.mode()?;
    let env_file = load_env_file(mode);

    let session_id = Uuid::new_v4().to_string();
    let _guard = logging::init_logging(&settings, mode, &session_id)?;
    if env_file.is_none() {
        tracing::warn!(mode = %mode, "no environment file found, using defaults");
    }

    let plan = StartupPlan::from_settings(&settings, session_id)?;
    tracing::info!(
        mode = %plan.mode,
        session = %plan.session_id,
        database = %plan.database_path.display(),
        "starting"
    );

    let in_process = cli.in_process;
    match cli.command {
        Commands::Schema => cmd_schema(plan, in_process).await,
        Commands::Migrate => with_app(plan, in_process, cmd_migrate).await,
        Commands::User { action } => {
            with_app(plan, in_process, |app| cmd_user(app, action)).await
        }
        Commands::Ipc { channel, arg } => {
            with_app(plan, in_process, |app| cmd_ipc(app, &channel, &arg)).await
        }
    }
}

/// Bootstrap the application, run `f` against it, then close storage.
async fn with_app<F>(plan: StartupPlan, in_process: bool, f: F) -> anyhow::Result<ExitCode>
where
    F: FnOnce(&App) -> anyhow::Result<ExitCode>,
{
    let app = if in_process {
        App::bootstrap_direct(plan).await
    } else {
        App::bootstrap(plan).await
    }
    .context("startup failed")?;

    let code = f(&app);
    app.close()?;
    code
}

fn cmd_migrate(app: &App) -> anyhow::Result<ExitCode> {
    let result = app.migrations();
    println!("Migrations: {}", result.migrations_path.display());
    if result.applied.is_empty() {
        println!("Nothing to apply.");
    } else {
        println!("Applied:");
        for file in &result.applied {
            println!("  - {}", file);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_schema(plan: StartupPlan, in_process: bool) -> anyhow::Result<ExitCode> {
    let ops: Box<dyn DbOperations> = if in_process {
        Box::new(DirectOperations::new(Dispatcher::new(plan.worker_config())))
    } else {
        let program = resolve_worker_path(plan.worker_path.clone())?;
        let options = BridgeOptions::new(program, &plan.worker_environment())
            .with_timeout(plan.worker_timeout)
            .with_shutdown_grace(plan.shutdown_grace);
        Box::new(Supervisor::open(options).await?)
    };

    let result = ops.generate_schema().await;
    ops.shutdown().await;
    let GenerateSchemaResult {
        message,
        ddl,
        tables,
    } = result.context("generate-schema failed")?;

    println!("-- {}", message);
    println!("{}", ddl);
    println!();
    if tables.is_empty() {
        println!("-- No tables present in {}", plan.database_path.display());
    } else {
        println!("-- Tables present: {}", tables.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_user(app: &App, action: UserAction) -> anyhow::Result<ExitCode> {
    let users = app.users();
    match action {
        UserAction::List => {
            let all = users.list()?;
            if all.is_empty() {
                println!("No users.");
            }
            for user in all {
                println!("{:>4}  {:<20} {}", user.id, user.username, user.email);
            }
        }
        UserAction::Get { id } => print_json(&users.get_by_id(id)?)?,
        UserAction::Add { username, email } => {
            print_json(&users.insert(&NewUser { username, email })?)?
        }
        UserAction::Update {
            id,
            username,
            email,
        } => print_json(&users.update_by_id(id, &UserUpdate { username, email })?)?,
        UserAction::Delete { id } => {
            users.delete_by_id(id)?;
            println!("Deleted user {}", id);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_ipc(app: &App, channel: &str, arg: &str) -> anyhow::Result<ExitCode> {
    let arg = serde_json::from_str(arg).context("argument is not valid JSON")?;
    let response = ipc::handle(&app.users(), channel, arg);
    print_json(&response)?;

    Ok(if response.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
