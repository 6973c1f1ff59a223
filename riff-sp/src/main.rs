//! riff-sp - Stem Processor microservice
//!
//! Accepts audio uploads, separates them into drums / bass / other / vocals
//! stems with an external tool, caches the result by content fingerprint and
//! streams progress to the client over a WebSocket.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use riff_common::config::{
    default_config_path, load_toml_config, CacheDirResolver, CONFIG_PATH_ENV,
};
use riff_common::events::ServerMessage;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use riff_sp::config::ServiceConfig;
use riff_sp::services::{CacheStore, CommandSeparator};
use riff_sp::AppState;

/// How long in-flight jobs get to wind down after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Command-line arguments for riff-sp
#[derive(Parser, Debug)]
#[command(name = "riff-sp")]
#[command(about = "Stem Processor microservice for RiffRoom")]
#[command(version)]
struct Args {
    /// TOML config file (default: ~/.config/riffroom/riff-sp.toml)
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Stem cache folder (overrides RIFF_CACHE_DIR and the config file)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Upload spool folder
    #[arg(long, env = "RIFF_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8007
    #[arg(short, long, env = "RIFF_BIND")]
    bind: Option<String>,

    /// Also write logs to this file
    #[arg(long, env = "RIFF_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path("riff-sp"))
        .context("Could not determine config file location")?;
    let toml_config = load_toml_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let cache_dir = CacheDirResolver::new()
        .with_cli_arg(args.cache_dir.as_deref())
        .with_toml(&toml_config)
        .resolve();

    let mut config = ServiceConfig::from_toml(&toml_config, cache_dir);
    if let Some(upload_dir) = args.upload_dir {
        config.upload_dir = upload_dir;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(log_file) = args.log_file {
        config.logging.file = Some(log_file);
    }

    init_tracing(&config)?;

    info!("Starting riff-sp (Stem Processor) microservice");
    info!(
        "Version: {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("RIFF_GIT_REV")
    );
    info!("Config file: {}", config_path.display());
    info!("Cache folder: {}", config.cache_dir.display());
    info!("Upload folder: {}", config.upload_dir.display());
    info!(
        program = %config.separator.program,
        model = %config.separator.model,
        "Separator configured"
    );

    let separator = Arc::new(CommandSeparator::from_config(&config.separator));
    let state = AppState::new(config, separator).context("Failed to open stem cache")?;

    let maintenance = CancellationToken::new();
    let prune_task = tokio::spawn(prune_loop(
        state.cache.clone(),
        state.config.cache_max_age,
        state.config.prune_interval,
        maintenance.clone(),
    ));

    let bind_address = state.config.bind_address.clone();
    let orchestrator = state.orchestrator.clone();
    let hub = state.hub.clone();
    let app = riff_sp::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open sockets would otherwise hold the server open
            hub.broadcast(ServerMessage::Notice(serde_json::json!({
                "message": "Server shutting down"
            })))
            .await;
            hub.close_all().await;
        })
        .await
        .context("Server error")?;

    maintenance.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, orchestrator.shutdown())
        .await
        .is_err()
    {
        warn!("Jobs still running after {:?}, exiting anyway", SHUTDOWN_GRACE);
    }
    let _ = prune_task.await;

    info!("Server shutdown complete");
    Ok(())
}

/// stderr output plus an optional ANSI-free file layer
fn init_tracing(config: &ServiceConfig) -> Result<()> {
    let level = &config.logging.level;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("riff_sp={level},riff_common={level},tower_http=info").into()
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

/// Periodic age-based cache pruning
async fn prune_loop(
    cache: CacheStore,
    max_age: Duration,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = cache.prune_older_than(max_age).await {
                    error!(error = %e, "Cache pruning failed");
                }
            }
            _ = stop.cancelled() => return,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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
