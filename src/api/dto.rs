//! Data Transfer Objects
//!
//! Response types for the HTTP endpoints.

use serde::{Deserialize, Serialize};

/// Full health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" or "unavailable"
    pub status: String,
    /// Currently connected subscribers
    pub subscribers: usize,
    pub uptime_seconds: u64,
    pub version: String,
}
