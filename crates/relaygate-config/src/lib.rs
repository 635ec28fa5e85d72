//! Configuration for relaygate.
//!
//! Supports JSON (with comments), YAML, and TOML config files, selected by
//! file extension. Every field beyond the listen address has a sensible
//! default so a minimal config is two lines.

mod defaults;
mod loader;
mod types;
mod validate;

pub use loader::{load_config, ConfigError};
pub use types::{
    Config, GatewayConfig, HealthConfig, LimitSettings, LoggingConfig, ServerConfig, StoreConfig,
};
pub use validate::validate_config;
