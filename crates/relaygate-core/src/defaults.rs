//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Tunnel Defaults
// ============================================================================

/// Buffer size for each tunnel pump direction (8 KiB).
pub const DEFAULT_PUMP_BUFFER_SIZE: usize = 8192;
/// Default per-tunnel idle timeout in seconds (0 = disabled).
pub const DEFAULT_TUNNEL_IDLE_TIMEOUT_SECS: u64 = 0;
/// Maximum bytes accepted for the request line + headers.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8192;

// ============================================================================
// Dial Defaults
// ============================================================================

/// Upstream dial attempts before giving up with 502.
pub const DEFAULT_DIAL_ATTEMPTS: u32 = 3;
/// Pause between dial attempts in seconds.
pub const DEFAULT_DIAL_RETRY_DELAY_SECS: u64 = 1;

// ============================================================================
// Pool / Health Defaults
// ============================================================================

/// Health checker sweep period in seconds.
pub const DEFAULT_HEALTH_SWEEP_SECS: u64 = 95;
/// A node is stale when its last heartbeat is older than this.
pub const DEFAULT_NODE_STALE_SECS: u64 = 190;

// ============================================================================
// Gateway Defaults
// ============================================================================

/// A control-channel node silent longer than this is deregistered.
pub const DEFAULT_GATEWAY_SILENCE_SECS: u64 = 190;
/// Period of the gateway heartbeat monitor.
pub const DEFAULT_GATEWAY_MONITOR_SECS: u64 = 30;

// ============================================================================
// Limit Defaults
// ============================================================================

/// Default concurrent connections allowed per token.
pub const DEFAULT_MAX_CONNECTIONS_PER_TOKEN: i64 = 5;
/// Default trailing byte-accounting window in minutes.
pub const DEFAULT_LIMIT_TIMEFRAME_MINUTES: i64 = 60;
/// Minimum gap between accepted requests per token, in seconds.
pub const DEFAULT_BURST_COOLDOWN_SECS: u64 = 1;

// ============================================================================
// Token / Connection Defaults
// ============================================================================

/// Token allow-set refresh period in seconds.
pub const DEFAULT_TOKEN_REFRESH_SECS: u64 = 300;
/// Default header carrying a raw token when Basic auth is not used.
pub const DEFAULT_TOKEN_HEADER: &str = "X-Proxy-Token";
/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
