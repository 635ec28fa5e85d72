//! Configuration type definitions for the proxy, limits, gateway, health
//! checker, store, and logging.

use std::collections::HashMap;

use relaygate_core::{RelayNode, Strategy};
use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Proxy listener address, e.g. `0.0.0.0:8899`.
    pub listen: String,
    /// Admin API listener (None = admin API disabled).
    #[serde(default)]
    pub admin_listen: Option<String>,
    /// Gateway control-channel listener (None = gateway disabled).
    #[serde(default)]
    pub gateway_listen: Option<String>,
    /// Node selection strategy.
    #[serde(default)]
    pub strategy: Strategy,
    /// Restrict selection to residential nodes.
    #[serde(default = "default_residential_only")]
    pub residential_only: bool,
    /// Header carrying a raw token when Basic auth is not used.
    #[serde(default = "default_token_header")]
    pub token_header: String,
    #[serde(default = "default_dial_attempts")]
    pub dial_attempts: u32,
    #[serde(default = "default_dial_retry_delay_secs")]
    pub dial_retry_delay_secs: u64,
    /// Per-tunnel idle timeout in seconds (0 = disabled).
    #[serde(default = "default_tunnel_idle_timeout_secs")]
    pub tunnel_idle_timeout_secs: u64,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    #[serde(default = "default_pump_buffer_size")]
    pub pump_buffer_size: usize,
    #[serde(default = "default_connection_backlog")]
    pub connection_backlog: u32,
    /// Token allow-set refresh period in seconds.
    #[serde(default = "default_token_refresh_secs")]
    pub token_refresh_secs: u64,
}

/// Per-token admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    #[serde(default = "default_max_connections_per_token")]
    pub max_connections_per_token: i64,
    /// Byte budget over the trailing window (0 = unlimited).
    #[serde(default)]
    pub byte_limit: i64,
    #[serde(default = "default_timeframe_minutes")]
    pub timeframe_minutes: i64,
    /// Minimum gap between accepted requests per token, in seconds.
    #[serde(default = "default_burst_cooldown_secs")]
    pub burst_cooldown_secs: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_connections_per_token: default_max_connections_per_token(),
            byte_limit: 0,
            timeframe_minutes: default_timeframe_minutes(),
            burst_cooldown_secs: default_burst_cooldown_secs(),
        }
    }
}

/// Gateway control-channel tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// A node silent longer than this is deregistered.
    #[serde(default = "default_silence_timeout_secs")]
    pub silence_timeout_secs: u64,
    /// Period of the heartbeat monitor.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            silence_timeout_secs: default_silence_timeout_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

/// Health checker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// Persistence collaborator configuration.
///
/// With a `database_url` the SQL store is used; without one the in-memory
/// store is seeded from `seed_tokens` / `seed_nodes` (development mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub seed_tokens: Vec<String>,
    #[serde(default)]
    pub seed_nodes: Vec<RelayNode>,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default)]
    pub level: Option<String>,
    /// Output format (json, pretty, compact).
    #[serde(default)]
    pub format: Option<String>,
    /// Output target (stdout, stderr).
    #[serde(default)]
    pub output: Option<String>,
    /// Per-module log level overrides.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:8899"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.token_header, "X-Proxy-Token");
        assert_eq!(config.server.strategy, Strategy::RoundRobin);
        assert!(config.server.residential_only);
        assert_eq!(config.server.dial_attempts, 3);
        assert_eq!(config.limits.max_connections_per_token, 5);
        assert_eq!(config.health.sweep_interval_secs, 95);
        assert_eq!(config.health.stale_after_secs, 190);
        assert_eq!(config.gateway.silence_timeout_secs, 190);
        assert!(config.store.database_url.is_none());
    }

    #[test]
    fn strategy_parses_from_config() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:8899"
            strategy = "Random"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.strategy, Strategy::Random);
    }
}
