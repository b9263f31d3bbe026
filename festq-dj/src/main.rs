//! Festival Live Queue (festq-dj) - Main entry point
//!
//! Loads configuration, restores state from the database, starts the round
//! and playback scheduler, and serves the HTTP/SSE API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use festq_common::config::TomlConfig;
use festq_dj::api::{self, AppContext};
use festq_dj::config::Config;
use festq_dj::db::SqliteStore;
use festq_dj::{scheduler, DjService};

/// Command-line arguments for festq-dj
#[derive(Parser, Debug)]
#[command(name = "festq-dj")]
#[command(about = "Festival live track queue and voting engine")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "FESTQ_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long, env = "FESTQ_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "FESTQ_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first so the log level can come from it
    let toml_config = TomlConfig::load_or_default(args.config.as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("festq_dj={},tower_http=info", toml_config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting festq-dj v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = Config::resolve(&toml_config, args.root_folder.as_deref(), args.port);
    info!("Root folder: {}", config.root_folder.display());
    info!("Database: {}", config.db_path.display());

    let pool = festq_common::db::init_database(&config.db_path)
        .await
        .context("Failed to initialize database")?;

    let shared_secret = festq_common::api::load_shared_secret(&pool)
        .await
        .context("Failed to load shared secret")?;
    if shared_secret == 0 {
        info!("Shared secret is 0: every caller has operator rights");
    }

    let store = Arc::new(SqliteStore::new(pool));
    let service = Arc::new(
        DjService::restore(store, config.service.clone())
            .await
            .context("Failed to restore service state")?,
    );
    info!(
        "Service ready: {} tracks in catalog",
        service.catalog().len()
    );

    let ticker = scheduler::spawn(service.clone());

    let ctx = AppContext {
        service,
        shared_secret,
    };
    let result = api::run(&config, ctx, shutdown_signal()).await;

    ticker.abort();
    result.context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
