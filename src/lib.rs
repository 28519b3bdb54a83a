//! # msg-relay
//!
//! Relays JSON messages from raw TCP producer streams to WebSocket
//! subscribers.
//!
//! ```text
//! producer --TCP bytes--> FrameExtractor --> validator --> BroadcastHub --WS--> subscribers
//!                                                 \                          /
//!                                                  `--> ControlHandshake <--'
//! ```
//!
//! Producers write concatenated JSON objects with no delimiter. The relay
//! reassembles complete objects by brace depth, validates them as
//! `{"text", "audio"?}` messages and fans them out to every connected
//! subscriber. A `{"type":"reset"}` request from either side runs the
//! application's [`ResetHandler`] and is answered with a broadcast
//! `{"type":"reset_ack"}`.
//!
//! ## Modules
//!
//! - [`protocol`]: Message types, validation and errors
//! - [`ingest`]: Frame extraction and the producer TCP listener
//! - [`websocket`]: Broadcast hub, reset handshake and the `/ws` handler
//! - [`client`]: Reconnecting subscriber client
//! - [`api`]: HTTP router (`/ws`, `/health`, `/audio`)
//! - [`server`]: Runs both listeners around one hub
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use msg_relay::{Config, LoggingReset, RelayServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     msg_relay::logging::init(&config.logging);
//!
//!     let server = RelayServer::bind(&config, Arc::new(LoggingReset)).await?;
//!     server.run(msg_relay::server::shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod websocket;

// Re-export top-level types for convenience
pub use protocol::{
    parse_frame, parse_text, ControlMessage, Envelope, Message, RelayError, RelayResult,
};

pub use ingest::{Frame, FrameExtractor, IngestConfig, IngestPipeline, ProducerListener};

pub use websocket::{
    BroadcastHub, BroadcastReport, ControlHandshake, HubConfig, HubError, LoggingReset,
    ResetHandler, SubscriberId,
};

pub use client::{
    ClientConfig, ConnectionState, Connector, SubscriberClient, SubscriberEvents, WsConnector,
};

pub use api::{build_router, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError, LogFormat, LoggingConfig};

pub use server::RelayServer;
