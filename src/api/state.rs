//! Application State
//!
//! Shared state accessible by all HTTP and WebSocket handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::websocket::{BroadcastHub, ControlHandshake, HubConfig, LoggingReset, ResetHandler};

/// Shared application state for all handlers
#[derive(Clone, Debug)]
pub struct AppState {
    /// Broadcast hub holding connected subscribers
    pub hub: Arc<BroadcastHub>,
    /// Reset handshake shared by subscribers and producers
    pub handshake: Arc<ControlHandshake>,
    /// HTTP server configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Create state with a fresh hub and the given reset handler
    pub fn new(config: ApiConfig, hub_config: HubConfig, reset: Arc<dyn ResetHandler>) -> Self {
        let hub = Arc::new(BroadcastHub::new(hub_config));
        Self::with_hub(config, hub, reset)
    }

    /// Create state around an existing hub
    pub fn with_hub(
        config: ApiConfig,
        hub: Arc<BroadcastHub>,
        reset: Arc<dyn ResetHandler>,
    ) -> Self {
        let handshake = Arc::new(ControlHandshake::new(Arc::clone(&hub), reset));
        Self {
            hub,
            handshake,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get connected subscriber count
    pub async fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count().await
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(
            ApiConfig::default(),
            HubConfig::default(),
            Arc::new(LoggingReset),
        )
    }
}

/// HTTP / WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port serving `/ws`, `/health` and `/audio`
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Directory served under `/audio` (disabled when unset)
    #[serde(default)]
    pub audio_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    3000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            audio_dir: None,
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}
