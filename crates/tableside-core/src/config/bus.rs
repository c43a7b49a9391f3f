//! Event bus subscription configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upstream event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus provider: `"memory"` (single node) or `"redis"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Prefix for gateway-owned Redis keys (sector assignments).
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Channels the subscriber listens on.
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    /// Deadline for connect + subscribe.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// How often a live subscription is pinged. `0` disables keepalive.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_seconds: u64,
    /// Deadline for one keepalive ping. A ping that errors or misses it
    /// fails the subscription.
    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_ms: u64,
    /// Validation drops per window that raise the drop-rate alert.
    #[serde(default = "default_drop_alert_threshold")]
    pub drop_alert_threshold: u64,
    /// Length of the rolling drop-rate window.
    #[serde(default = "default_drop_window")]
    pub drop_window_seconds: u64,
    /// Circuit breaker guarding all bus I/O.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Reconnect backoff.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            channels: default_channels(),
            connect_timeout_ms: default_connect_timeout(),
            keepalive_interval_seconds: default_keepalive_interval(),
            keepalive_timeout_ms: default_keepalive_timeout(),
            drop_alert_threshold: default_drop_alert_threshold(),
            drop_window_seconds: default_drop_window(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl BusConfig {
    /// Connect + subscribe deadline as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Keepalive period, or `None` when disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_seconds > 0)
            .then(|| Duration::from_secs(self.keepalive_interval_seconds))
    }

    /// Keepalive ping deadline as a [`Duration`].
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }

    /// Drop-rate window as a [`Duration`].
    pub fn drop_window(&self) -> Duration {
        Duration::from_secs(self.drop_window_seconds)
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time spent open before a probe is allowed.
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_seconds: default_cooldown(),
        }
    }
}

impl BreakerConfig {
    /// Cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

/// Decorrelated-jitter backoff bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Smallest delay between reconnect attempts.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Largest delay between reconnect attempts.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "tableside:".to_string()
}

fn default_channels() -> Vec<String> {
    vec![
        "events:admin".to_string(),
        "events:kitchen".to_string(),
        "events:waiter".to_string(),
        "events:diner".to_string(),
    ]
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_keepalive_interval() -> u64 {
    15
}

fn default_keepalive_timeout() -> u64 {
    5000
}

fn default_drop_alert_threshold() -> u64 {
    10
}

fn default_drop_window() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_cooldown() -> u64 {
    30
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}
