//! Pre-start configuration validation.

use std::net::SocketAddr;

use crate::{Config, ConfigError};

/// Validate a loaded configuration before the server starts.
///
/// Catches the mistakes that would otherwise surface as confusing runtime
/// errors: unparseable listen addresses, a zero dial budget, and a byte
/// window without a timeframe.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    parse_listen("server.listen", &config.server.listen)?;
    if let Some(addr) = &config.server.admin_listen {
        parse_listen("server.admin_listen", addr)?;
    }
    if let Some(addr) = &config.server.gateway_listen {
        parse_listen("server.gateway_listen", addr)?;
    }

    if config.server.dial_attempts == 0 {
        return Err(ConfigError::Validation(
            "server.dial_attempts must be at least 1".into(),
        ));
    }
    if config.server.pump_buffer_size == 0 {
        return Err(ConfigError::Validation(
            "server.pump_buffer_size must be non-zero".into(),
        ));
    }
    if config.limits.max_connections_per_token < 0 {
        return Err(ConfigError::Validation(
            "limits.max_connections_per_token must not be negative".into(),
        ));
    }
    if config.limits.byte_limit > 0 && config.limits.timeframe_minutes <= 0 {
        return Err(ConfigError::Validation(
            "limits.timeframe_minutes must be positive when byte_limit is set".into(),
        ));
    }
    if config.health.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "health.sweep_interval_secs must be non-zero".into(),
        ));
    }
    if config.store.database_url.is_none() && config.store.seed_tokens.is_empty() {
        return Err(ConfigError::Validation(
            "store.database_url or store.seed_tokens is required".into(),
        ));
    }
    Ok(())
}

fn parse_listen(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{field}: invalid address `{value}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:8899"

            [store]
            seed_tokens = ["TEST-TOKEN-123"]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn accepts_minimal_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn rejects_bad_listen() {
        let mut config = base_config();
        config.server.listen = "not-an-addr".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_zero_dial_attempts() {
        let mut config = base_config();
        config.server.dial_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_byte_limit_without_window() {
        let mut config = base_config();
        config.limits.byte_limit = 1024;
        config.limits.timeframe_minutes = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_missing_store() {
        let mut config = base_config();
        config.store.seed_tokens.clear();
        assert!(validate_config(&config).is_err());
    }
}
