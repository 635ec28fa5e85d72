//! Serde default helpers for configuration fields.

use relaygate_core::defaults::*;

pub(crate) fn default_token_header() -> String {
    DEFAULT_TOKEN_HEADER.to_string()
}

pub(crate) fn default_residential_only() -> bool {
    true
}

pub(crate) fn default_dial_attempts() -> u32 {
    DEFAULT_DIAL_ATTEMPTS
}

pub(crate) fn default_dial_retry_delay_secs() -> u64 {
    DEFAULT_DIAL_RETRY_DELAY_SECS
}

pub(crate) fn default_tunnel_idle_timeout_secs() -> u64 {
    DEFAULT_TUNNEL_IDLE_TIMEOUT_SECS
}

pub(crate) fn default_max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_BYTES
}

pub(crate) fn default_pump_buffer_size() -> usize {
    DEFAULT_PUMP_BUFFER_SIZE
}

pub(crate) fn default_connection_backlog() -> u32 {
    DEFAULT_CONNECTION_BACKLOG
}

pub(crate) fn default_token_refresh_secs() -> u64 {
    DEFAULT_TOKEN_REFRESH_SECS
}

pub(crate) fn default_max_connections_per_token() -> i64 {
    DEFAULT_MAX_CONNECTIONS_PER_TOKEN
}

pub(crate) fn default_timeframe_minutes() -> i64 {
    DEFAULT_LIMIT_TIMEFRAME_MINUTES
}

pub(crate) fn default_burst_cooldown_secs() -> u64 {
    DEFAULT_BURST_COOLDOWN_SECS
}

pub(crate) fn default_sweep_interval_secs() -> u64 {
    DEFAULT_HEALTH_SWEEP_SECS
}

pub(crate) fn default_stale_after_secs() -> u64 {
    DEFAULT_NODE_STALE_SECS
}

pub(crate) fn default_silence_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_SILENCE_SECS
}

pub(crate) fn default_monitor_interval_secs() -> u64 {
    DEFAULT_GATEWAY_MONITOR_SECS
}
