//! Main server loop and background task wiring.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relaygate_auth::{AllowSet, ReloadableTokens};
use relaygate_config::Config;
use relaygate_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admin::admin_routes;
use crate::error::ProxyError;
use crate::gateway::Gateway;
use crate::handler::handle_conn;
use crate::health::run_health_checker;
use crate::pool::{NodePool, SelectionFilter};
use crate::session::SessionTracker;
use crate::state::ProxyState;
use crate::util::{create_listener, ConnectionGuard, ConnectionTracker};

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration =
    Duration::from_secs(relaygate_core::defaults::DEFAULT_SHUTDOWN_TIMEOUT_SECS);

/// Tables the store must have before the server accepts traffic.
const REQUIRED_TABLES: &[&str] = &["proxy_tokens", "relay_nodes", "token_sessions"];

/// Run the server with a cancellation token for graceful shutdown.
pub async fn run_with_shutdown(
    config: Config,
    store: Arc<dyn Store>,
    tokens: Arc<ReloadableTokens>,
    shutdown: CancellationToken,
) -> Result<(), ProxyError> {
    for table in REQUIRED_TABLES {
        if !store.table_exists(table).await? {
            return Err(ProxyError::Config(format!(
                "table `{table}` is missing; run migrations"
            )));
        }
    }

    let listen: SocketAddr = config
        .server
        .listen
        .parse()
        .map_err(|_| ProxyError::Config("invalid listen address".into()))?;

    let pool = Arc::new(
        NodePool::load(
            store.clone(),
            SelectionFilter {
                residential_only: config.server.residential_only,
            },
        )
        .await?,
    );
    let sessions = Arc::new(SessionTracker::new(store.clone()));

    // Gateway control channel, when configured.
    let gateway = match &config.server.gateway_listen {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|_| ProxyError::Config("invalid gateway listen address".into()))?;
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(address = %addr, "gateway control channel listening");
            let gateway = Arc::new(Gateway::new(Duration::from_secs(
                config.gateway.silence_timeout_secs,
            )));
            tokio::spawn(gateway.clone().run(listener, shutdown.child_token()));
            tokio::spawn(gateway.clone().run_monitor(
                Duration::from_secs(config.gateway.monitor_interval_secs),
                shutdown.child_token(),
            ));
            Some(gateway)
        }
        None => None,
    };

    let state = Arc::new(ProxyState::new(
        &config,
        pool.clone(),
        sessions,
        tokens.clone(),
        gateway,
    ));
    state
        .burst
        .start_cleanup_task(Duration::from_secs(60), shutdown.child_token());

    // Health checker.
    tokio::spawn(run_health_checker(
        pool.clone(),
        Duration::from_secs(config.health.sweep_interval_secs),
        Duration::from_secs(config.health.stale_after_secs),
        shutdown.child_token(),
    ));

    // Token allow-set refresher.
    tokio::spawn(run_token_refresher(
        store.clone(),
        tokens.clone(),
        Duration::from_secs(config.server.token_refresh_secs),
        shutdown.child_token(),
    ));

    // Admin API, when configured.
    if let Some(addr) = &config.server.admin_listen {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| ProxyError::Config("invalid admin listen address".into()))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(address = %addr, "admin API listening");
        let app = admin_routes(state.clone());
        let admin_shutdown = shutdown.child_token();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(admin_shutdown.cancelled_owned());
            if let Err(err) = serve.await {
                warn!(error = %err, "admin API server failed");
            }
        });
    }

    let listener = create_listener(listen, config.server.connection_backlog)?;
    info!(address = %listen, backlog = config.server.connection_backlog, "proxy listening");

    let tracker = ConnectionTracker::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }

            result = listener.accept() => {
                let (tcp, peer) = result?;
                debug!(peer = %peer, "new connection");

                let state = state.clone();
                let guard = ConnectionGuard::new(tracker.clone());

                tokio::spawn(async move {
                    let _guard = guard;
                    match handle_conn(tcp, state, peer).await {
                        Ok(()) => debug!(peer = %peer, "connection closed"),
                        Err(err) => match err {
                            ProxyError::Io(_) | ProxyError::Store(_) => {
                                warn!(peer = %peer, kind = err.kind(), error = %err, "connection failed")
                            }
                            _ => debug!(peer = %peer, kind = err.kind(), error = %err, "connection rejected"),
                        },
                    }
                });
            }
        }
    }

    // Graceful drain: wait for active connections.
    let active = tracker.count();
    if active > 0 {
        info!(active, "waiting for connections to drain");
        if tracker.wait_for_zero(DEFAULT_SHUTDOWN_TIMEOUT).await {
            info!("all connections drained");
        } else {
            warn!(active = tracker.count(), "shutdown timeout, connections still active");
        }
    }

    info!("server stopped");
    Ok(())
}

/// Refresh the token allow-set from the store on a fixed period.
async fn run_token_refresher(
    store: Arc<dyn Store>,
    tokens: Arc<ReloadableTokens>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("token refresher shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {
                match store.load_active_tokens().await {
                    Ok(fresh) => {
                        let count = fresh.len();
                        tokens.reload(AllowSet::from_tokens(fresh));
                        debug!(count, "token allow-set refreshed");
                    }
                    // The stale set keeps serving; better than dropping all tenants.
                    Err(err) => warn!(error = %err, "token refresh failed"),
                }
            }
        }
    }
}

/// Run the server until error, without external shutdown control.
pub async fn run(
    config: Config,
    store: Arc<dyn Store>,
    tokens: Arc<ReloadableTokens>,
) -> Result<(), ProxyError> {
    run_with_shutdown(config, store, tokens, CancellationToken::new()).await
}
