//! Shared state handed to every connection task.

use std::sync::Arc;
use std::time::Duration;

use relaygate_auth::ReloadableTokens;
use relaygate_config::{Config, LimitSettings};
use relaygate_core::Strategy;

use crate::gateway::Gateway;
use crate::pool::NodePool;
use crate::rate_limit::BurstGuard;
use crate::session::SessionTracker;

/// Owned service objects plus the per-connection tunables.
///
/// Everything is instantiated explicitly and passed around as
/// `Arc<ProxyState>` — no globals, so tests can build isolated instances.
pub struct ProxyState {
    pub pool: Arc<NodePool>,
    pub sessions: Arc<SessionTracker>,
    pub tokens: Arc<ReloadableTokens>,
    pub gateway: Option<Arc<Gateway>>,
    pub burst: BurstGuard,
    pub limits: LimitSettings,
    pub strategy: Strategy,
    pub token_header: String,
    pub dial_attempts: u32,
    pub dial_retry_delay: Duration,
    pub tunnel_idle_timeout: Option<Duration>,
    pub pump_buffer_size: usize,
    pub max_header_bytes: usize,
}

impl ProxyState {
    /// Assemble state from config plus the already-built service objects.
    pub fn new(
        config: &Config,
        pool: Arc<NodePool>,
        sessions: Arc<SessionTracker>,
        tokens: Arc<ReloadableTokens>,
        gateway: Option<Arc<Gateway>>,
    ) -> Self {
        let server = &config.server;
        Self {
            pool,
            sessions,
            tokens,
            gateway,
            burst: BurstGuard::new(Duration::from_secs(config.limits.burst_cooldown_secs)),
            limits: config.limits.clone(),
            strategy: server.strategy,
            token_header: server.token_header.clone(),
            dial_attempts: server.dial_attempts,
            dial_retry_delay: Duration::from_secs(server.dial_retry_delay_secs),
            tunnel_idle_timeout: match server.tunnel_idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            pump_buffer_size: server.pump_buffer_size,
            max_header_bytes: server.max_header_bytes,
        }
    }
}
