//! CLI entry point for the relaygate server.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relaygate_auth::{AllowSet, ReloadableTokens};
use relaygate_config::{load_config, validate_config, LoggingConfig};
use relaygate_store::{MemoryStore, SqlStore, Store};

use crate::{run_with_shutdown, CancellationToken};

/// Relaygate server CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "relaygate", version, about = "Multi-tenant token proxy with relay-node gateway")]
pub struct ServerArgs {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,
}

/// Run the server with the given arguments.
pub async fn run(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)?;
    validate_config(&config)?;

    init_tracing(&config.logging);

    // Build the persistence collaborator.
    let store: Arc<dyn Store> = match &config.store.database_url {
        Some(url) => {
            let store = SqlStore::connect(url, 10).await?;
            store.check_ready().await?;
            info!(db = ?store.database_type(), "connected to store");
            Arc::new(store)
        }
        None => {
            info!(
                tokens = config.store.seed_tokens.len(),
                nodes = config.store.seed_nodes.len(),
                "using in-memory store from seed config"
            );
            Arc::new(MemoryStore::with_seed(
                config.store.seed_tokens.clone(),
                config.store.seed_nodes.clone(),
            ))
        }
    };

    // Initial token allow-set.
    let initial = store.load_active_tokens().await?;
    info!(count = initial.len(), "token allow-set loaded");
    let tokens = Arc::new(ReloadableTokens::new(AllowSet::from_tokens(initial)));

    // Graceful shutdown on SIGTERM/SIGINT.
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    // SIGHUP forces an immediate allow-set refresh (Unix only).
    #[cfg(unix)]
    {
        let store = store.clone();
        let tokens = tokens.clone();
        tokio::spawn(async move {
            reload_signal_handler(store, tokens).await;
        });
    }

    run_with_shutdown(config, store, tokens, shutdown).await?;
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Handle SIGHUP: reload the allow-set from the store immediately.
#[cfg(unix)]
async fn reload_signal_handler(store: Arc<dyn Store>, tokens: Arc<ReloadableTokens>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!("failed to install SIGHUP handler: {}, token reload disabled", e);
            return;
        }
    };

    loop {
        sighup.recv().await;
        info!("SIGHUP received, refreshing token allow-set");
        match store.load_active_tokens().await {
            Ok(fresh) => {
                let count = fresh.len();
                tokens.reload(AllowSet::from_tokens(fresh));
                info!(count, "token allow-set refreshed");
            }
            Err(e) => warn!("token refresh failed: {}", e),
        }
    }
}

/// Initialize the tracing subscriber from logging config.
///
/// Supports `level`, per-module `filters`, `format` (json, pretty,
/// compact), and `output` (stdout, stderr).
fn init_tracing(config: &LoggingConfig) {
    let base_level = config.level.as_deref().unwrap_or("info");
    let mut filter_str = base_level.to_string();

    for (module, level) in &config.filters {
        filter_str.push(',');
        filter_str.push_str(module);
        filter_str.push('=');
        filter_str.push_str(level);
    }

    let filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new("info"));

    let format = config.format.as_deref().unwrap_or("pretty");
    let output = config.output.as_deref().unwrap_or("stderr");

    match (format, output) {
        ("json", "stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stdout))
                .init();
        }
        ("json", _) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        ("compact", "stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(io::stdout))
                .init();
        }
        ("compact", _) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
        (_, "stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stdout))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}
