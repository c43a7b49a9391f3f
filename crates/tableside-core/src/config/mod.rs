//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section, and every field carries a default so the gateway can start
//! without any configuration file at all.

pub mod app;
pub mod auth;
pub mod bus;
pub mod logging;
pub mod realtime;

use serde::{Deserialize, Serialize};

pub use self::app::ServerConfig;
pub use self::auth::AuthConfig;
pub use self::bus::{BreakerConfig, BusConfig, RetryConfig};
pub use self::logging::LoggingConfig;
pub use self::realtime::{BroadcastConfig, LockConfig, RealtimeConfig};

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay) and
/// `TABLESIDE__*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Token verification settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Event bus subscription settings.
    #[serde(default)]
    pub bus: BusConfig,
    /// Real-time WebSocket settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `TABLESIDE__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("TABLESIDE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .with_list_parse_key("bus.channels")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let parsed: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject settings that would make the gateway misbehave at runtime.
    pub fn validate(&self) -> Result<(), AppError> {
        let locks = &self.realtime.locks;
        if locks.low_water >= locks.high_water {
            return Err(AppError::configuration(format!(
                "realtime.locks.low_water ({}) must be below high_water ({})",
                locks.low_water, locks.high_water
            )));
        }
        if self.realtime.broadcast.batch_size == 0 {
            return Err(AppError::configuration(
                "realtime.broadcast.batch_size must be positive",
            ));
        }
        if self.realtime.rate_limit_messages == 0 {
            return Err(AppError::configuration(
                "realtime.rate_limit_messages must be positive",
            ));
        }
        if self.realtime.heartbeat_timeout_seconds <= self.realtime.heartbeat_interval_seconds {
            return Err(AppError::configuration(
                "realtime.heartbeat_timeout_seconds must exceed the heartbeat interval",
            ));
        }
        if self.bus.breaker.failure_threshold == 0 || self.bus.breaker.success_threshold == 0 {
            return Err(AppError::configuration(
                "bus.breaker thresholds must be positive",
            ));
        }
        if self.bus.keepalive_interval().is_some() && self.bus.keepalive_timeout_ms == 0 {
            return Err(AppError::configuration(
                "bus.keepalive_timeout_ms must be positive when keepalive is enabled",
            ));
        }
        if self.bus.retry.base_delay_ms > self.bus.retry.max_delay_ms {
            return Err(AppError::configuration(
                "bus.retry.base_delay_ms must not exceed max_delay_ms",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.realtime.max_message_bytes, 65_536);
        assert_eq!(config.realtime.heartbeat_timeout_seconds, 90);
        assert_eq!(config.realtime.locks.high_water, 500);
        assert_eq!(config.realtime.locks.low_water, 400);
        assert_eq!(config.realtime.broadcast.batch_size, 50);
        assert!(config.realtime.broadcast.sector_fallback_to_branch);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[realtime]\nrate_limit_messages = 5\n[bus]\nprovider = \"redis\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.realtime.rate_limit_messages, 5);
        assert_eq!(config.realtime.rate_limit_window_ms, 1000);
        assert_eq!(config.bus.provider, "redis");
        assert_eq!(config.bus.breaker.failure_threshold, 5);
        assert_eq!(config.server.port, 8001);
    }

    #[test]
    fn test_inverted_lock_watermarks_rejected() {
        let mut config = AppConfig::default();
        config.realtime.locks.low_water = 600;
        assert!(config.validate().is_err());
    }
}
