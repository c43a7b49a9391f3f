//! Real-time WebSocket engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Real-time (WebSocket) engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Expected client heartbeat cadence.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Silence after which a connection is considered stale.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,
    /// Period of the stale-connection sweep.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Largest accepted client frame in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Messages allowed per connection per rate window.
    #[serde(default = "default_rate_limit_messages")]
    pub rate_limit_messages: usize,
    /// Rate window length.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_ms: u64,
    /// How often a live session re-verifies its token.
    #[serde(default = "default_revalidate_interval")]
    pub revalidate_interval_seconds: u64,
    /// Maximum concurrent connections for one user.
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    /// Maximum concurrent connections registered under one branch.
    #[serde(default = "default_max_connections_per_branch")]
    pub max_connections_per_branch: usize,
    /// Deadline for the sector-assignment lookup during registration.
    #[serde(default = "default_sector_lookup_timeout")]
    pub sector_lookup_timeout_ms: u64,
    /// How long a looked-up sector assignment is cached.
    #[serde(default = "default_sector_cache_ttl")]
    pub sector_cache_ttl_seconds: u64,
    /// Outbound frames buffered per connection before sends fail.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer_size: usize,
    /// Upper bound on waiting for in-flight broadcasts during shutdown.
    #[serde(default = "default_shutdown_drain")]
    pub shutdown_drain_seconds: u64,
    /// Sharded lock settings.
    #[serde(default)]
    pub locks: LockConfig,
    /// Broadcast fan-out settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval(),
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            cleanup_interval_seconds: default_cleanup_interval(),
            max_message_bytes: default_max_message_bytes(),
            rate_limit_messages: default_rate_limit_messages(),
            rate_limit_window_ms: default_rate_limit_window(),
            revalidate_interval_seconds: default_revalidate_interval(),
            max_connections_per_user: default_max_connections_per_user(),
            max_connections_per_branch: default_max_connections_per_branch(),
            sector_lookup_timeout_ms: default_sector_lookup_timeout(),
            sector_cache_ttl_seconds: default_sector_cache_ttl(),
            outbound_buffer_size: default_outbound_buffer(),
            shutdown_drain_seconds: default_shutdown_drain(),
            locks: LockConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// Stale-connection threshold.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    /// Sweep period.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// Per-connection rate window.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// Token re-verification period.
    pub fn revalidate_interval(&self) -> Duration {
        Duration::from_secs(self.revalidate_interval_seconds)
    }

    /// Sector lookup deadline.
    pub fn sector_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.sector_lookup_timeout_ms)
    }

    /// Sector cache TTL.
    pub fn sector_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.sector_cache_ttl_seconds)
    }

    /// Shutdown drain bound.
    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_seconds)
    }
}

/// Sharded lock cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Cached lock count that triggers eviction.
    #[serde(default = "default_high_water")]
    pub high_water: usize,
    /// Cached lock count eviction stops at.
    #[serde(default = "default_low_water")]
    pub low_water: usize,
    /// Deadline for acquiring a set of scope locks.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            high_water: default_high_water(),
            low_water: default_low_water(),
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }
}

impl LockConfig {
    /// Acquisition deadline as a [`Duration`].
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Broadcast fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Connections delivered to concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Deadline for a single connection send.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
    /// Router-wide ceiling on broadcast attempts per second.
    #[serde(default = "default_max_broadcasts_per_second")]
    pub max_broadcasts_per_second: usize,
    /// Deliver sector events to branch connections without a sector
    /// assignment as well. When nobody in the branch has one, this reaches
    /// the whole branch.
    #[serde(default = "default_true")]
    pub sector_fallback_to_branch: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            send_timeout_ms: default_send_timeout(),
            max_broadcasts_per_second: default_max_broadcasts_per_second(),
            sector_fallback_to_branch: true,
        }
    }
}

impl BroadcastConfig {
    /// Per-send deadline as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    90
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_max_message_bytes() -> usize {
    65_536
}

fn default_rate_limit_messages() -> usize {
    20
}

fn default_rate_limit_window() -> u64 {
    1000
}

fn default_revalidate_interval() -> u64 {
    300
}

fn default_max_connections_per_user() -> usize {
    3
}

fn default_max_connections_per_branch() -> usize {
    1000
}

fn default_sector_lookup_timeout() -> u64 {
    2000
}

fn default_sector_cache_ttl() -> u64 {
    30
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_shutdown_drain() -> u64 {
    10
}

fn default_high_water() -> usize {
    500
}

fn default_low_water() -> usize {
    400
}

fn default_acquire_timeout() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    50
}

fn default_send_timeout() -> u64 {
    1000
}

fn default_max_broadcasts_per_second() -> usize {
    1000
}

fn default_true() -> bool {
    true
}
