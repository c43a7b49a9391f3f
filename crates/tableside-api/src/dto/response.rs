//! Response DTOs.

use serde::{Deserialize, Serialize};

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, `degraded` (bus circuit not closed or drop alert raised) or
    /// `shutting_down`.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Seconds since start.
    pub uptime_seconds: u64,
    /// Registered connections.
    pub connections: usize,
    /// Distinct users with at least one connection.
    pub users: usize,
    /// Event bus circuit state.
    pub breaker: String,
    /// Whether the bus drop-rate alert is raised.
    pub drop_rate_alert: bool,
}
