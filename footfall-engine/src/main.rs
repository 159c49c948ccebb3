//! footfall-engine - pedestrian-flow ingestion service
//!
//! Keeps the nowcast cache warm in the background until shut down, or runs a
//! single poll or regeneration and prints the result.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use footfall_common::config::{resolve_config_path, resolve_root_folder, EngineConfig};
use footfall_engine::Engine;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for footfall-engine
#[derive(Parser, Debug)]
#[command(name = "footfall-engine")]
#[command(about = "Pedestrian-flow ingestion and nowcast cache")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data folder holding the database and resource files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Regenerate the nowcast once, print it and exit
    #[arg(long, conflicts_with = "poll")]
    once: bool,

    /// Poll every sensor once, print the fused rows and exit
    #[arg(long)]
    poll: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = match &config_path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting footfall-engine {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("No config file found, using compiled defaults"),
    }

    config.validate().context("Invalid configuration")?;

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let engine = Engine::build_default(&config, &root_folder)
        .await
        .context("Failed to initialize engine")?;

    if args.poll {
        let rows = engine.pipeline.poll_all().await.context("Sensor poll failed")?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if args.once {
        let nowcast = engine.nowcast.refresh().await.context("Nowcast regeneration failed")?;
        println!("{}", serde_json::to_string_pretty(&nowcast)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let scheduler = engine.scheduler;
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    shutdown_signal().await;
    cancel.cancel();
    task.await.context("Autorefresh task panicked")?;

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
