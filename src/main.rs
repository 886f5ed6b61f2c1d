use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use teamsync::catalog::CatalogError;
use teamsync::config::ConfigError;
use teamsync::engine::snapshot::fetch_fresh;
use teamsync::store::StoreError;
use teamsync::store::pg::PgStore;
use teamsync::sync::metric::RetryPolicy;
use teamsync::transport::TransportError;
use teamsync::transport::ws::WsTransport;
use teamsync::{ErrorCode, OpenError, SlideCatalog, SyncClient, SyncConfig};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::Catalog(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Transport(e) => e.error_code(),
            Self::Open(e) => e.error_code(),
            Self::Json(_) => "E_OUTPUT",
            Self::Signal(_) => "E_SIGNAL",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "teamsync", about = "Follow a facilitated session as one team")]
struct Cli {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Slide catalog (YAML, or JSON by extension).
    #[arg(long, env = "TEAMSYNC_CATALOG")]
    catalog: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Target {
    #[arg(long, env = "TEAMSYNC_SESSION_ID")]
    session: Uuid,

    #[arg(long, env = "TEAMSYNC_TEAM_ID")]
    team: Uuid,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine and print every view change until Ctrl-C.
    Watch {
        #[command(flatten)]
        target: Target,

        #[arg(long, env = "TEAMSYNC_REALTIME_URL", default_value = "ws://127.0.0.1:3000/realtime")]
        realtime_url: String,
    },
    /// Read the store once and print the reconciled state.
    Snapshot {
        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to load .env: {e}");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.code(), error = %e, "teamsync failed");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = SyncConfig::from_env()?;
    let catalog = Arc::new(SlideCatalog::from_path(&cli.catalog)?);
    let store = Arc::new(PgStore::connect(&cli.database_url).await?);
    tracing::info!(slides = catalog.len(), "catalog loaded");

    match cli.command {
        Command::Watch { target, realtime_url } => {
            let transport = Arc::new(WsTransport::new(&realtime_url)?);
            run_watch(SyncClient::new(store, transport, catalog, config), target).await
        }
        Command::Snapshot { target } => {
            let fresh = fetch_fresh(store.as_ref(), &catalog, target.session, target.team, RetryPolicy::from(&config)).await?;
            print_json(&fresh)
        }
    }
}

async fn run_watch(mut client: SyncClient, target: Target) -> Result<(), CliError> {
    let handle = client.open(target.session, target.team).await?;
    let mut views = handle.subscribe();
    tracing::info!(session_id = %target.session, team_id = %target.team, "watching");

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                print_json(&view)?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    client.close().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
