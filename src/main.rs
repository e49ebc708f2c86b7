mod config;
mod maintenance;
mod models;
mod status;
mod store;
mod web;

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{config::AppConfig, status::StatusProbe, web::AppState};

#[derive(Parser)]
#[command(name = "pergunu-server", version, about = "PERGUNU membership backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default).
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Replace plaintext passwords in the store with salted hashes.
    MigratePasswords {
        /// JSON store to migrate; ignored when DATABASE_URL is set.
        #[arg(long)]
        data_file: Option<PathBuf>,
    },
    /// Poll the API and log its status until interrupted.
    Status {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        mirror: Option<PathBuf>,
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing();

    if let Err(err) = app_main().await {
        error!(?err, "application error");
        std::process::exit(1);
    }
}

async fn app_main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
        Commands::MigratePasswords { data_file } => {
            if let Some(data_file) = data_file {
                config.data_file = data_file;
            }
            migrate(config).await
        }
        Commands::Status {
            url,
            mirror,
            interval_secs,
        } => {
            if let Some(url) = url {
                config.status_url = url;
            }
            if let Some(mirror) = mirror {
                config.status_mirror = mirror;
            }
            if let Some(secs) = interval_secs {
                if secs == 0 {
                    bail!("--interval-secs must be greater than 0");
                }
                config.status_interval = Duration::from_secs(secs);
            }
            watch_status(config).await
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let state = AppState::new(&config).await?;
    state
        .ensure_seed_admin(&config.seed_admin_password)
        .await?;

    let app = web::router::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn migrate(config: AppConfig) -> Result<()> {
    let store = store::open(config.database_url.as_deref(), config.data_file.clone())
        .await
        .context("failed to open credential store")?;

    let report = maintenance::migrate_passwords(store.as_ref()).await?;
    info!(
        hashed = report.hashed,
        skipped = report.skipped,
        "all passwords are hashed"
    );
    Ok(())
}

async fn watch_status(config: AppConfig) -> Result<()> {
    let probe = StatusProbe::new(
        config.status_url.clone(),
        config.status_mirror.clone(),
        config.status_interval,
    )?;
    info!(
        url = %config.status_url,
        mirror = %config.status_mirror.display(),
        interval_secs = config.status_interval.as_secs(),
        "watching API status"
    );

    let (mut reports, handle) = probe.spawn();

    loop {
        tokio::select! {
            changed = reports.changed() => {
                if changed.is_err() {
                    warn!("status probe stopped");
                    break;
                }
                let report = reports.borrow_and_update().clone();
                let line = serde_json::to_string(&report)
                    .context("failed to encode status report")?;
                info!(report = %line, "status");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping status probe");
                break;
            }
        }
    }

    handle.abort();
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
