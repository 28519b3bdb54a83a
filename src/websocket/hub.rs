//! Broadcast Hub
//!
//! Holds the set of connected subscribers and fans messages out to them.
//! Each subscriber is represented by the sending half of an unbounded channel
//! drained by that subscriber's socket writer task, so a broadcast never
//! waits on a slow socket.
//!
//! The registry sits behind a single mutex. Broadcasts serialize through it,
//! which gives every subscriber the same message order.

use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::protocol::{Envelope, RelayError};

/// Unique identifier for a subscriber connection
pub type SubscriberId = String;

/// Configuration for the broadcast hub
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Maximum number of concurrent subscribers
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    1000
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

/// Handle for pushing serialized payloads to one subscriber
#[derive(Debug)]
pub struct SubscriberHandle {
    sender: mpsc::UnboundedSender<String>,
}

impl SubscriberHandle {
    /// A subscriber is ready while its writer task still holds the receiver
    fn is_ready(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the payload was handed to
    pub delivered: usize,
    /// Subscribers skipped because they were not ready
    pub skipped: usize,
}

/// Manages subscriber connections and message fan-out
#[derive(Debug)]
pub struct BroadcastHub {
    /// `None` once the hub has been shut down
    registry: Mutex<Option<HashMap<SubscriberId, SubscriberHandle>>>,
    config: HubConfig,
}

impl BroadcastHub {
    /// Create a new hub ready to accept subscribers
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Mutex::new(Some(HashMap::new())),
            config,
        }
    }

    /// Register a subscriber channel
    ///
    /// Returns the subscriber ID on success, or an error if the hub is at its
    /// connection limit or has been shut down.
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<String>,
    ) -> Result<SubscriberId, HubError> {
        let mut registry = self.registry.lock().await;
        let subscribers = registry.as_mut().ok_or(HubError::Unavailable)?;

        if subscribers.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        subscribers.insert(id.clone(), SubscriberHandle { sender });

        tracing::info!(
            subscriber_id = %id,
            subscribers = subscribers.len(),
            "Subscriber connected"
        );
        Ok(id)
    }

    /// Remove a subscriber; returns false if it was not registered
    pub async fn unregister(&self, id: &str) -> bool {
        let mut registry = self.registry.lock().await;
        let removed = registry
            .as_mut()
            .map(|subscribers| subscribers.remove(id).is_some())
            .unwrap_or(false);

        if removed {
            tracing::info!(subscriber_id = %id, "Subscriber disconnected");
        }
        removed
    }

    /// Send a payload to every ready subscriber
    ///
    /// Delivery is fire-and-forget: a subscriber that is not ready, or whose
    /// channel fails, is skipped without affecting the others.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<BroadcastReport, HubError> {
        let text = envelope
            .to_json()
            .map_err(|e| HubError::Serialization(e.to_string()))?;

        let registry = self.registry.lock().await;
        let subscribers = registry.as_ref().ok_or(HubError::Unavailable)?;

        let mut report = BroadcastReport::default();
        for (id, handle) in subscribers {
            if !handle.is_ready() {
                report.skipped += 1;
                continue;
            }
            if handle.sender.send(text.clone()).is_ok() {
                report.delivered += 1;
            } else {
                tracing::debug!(subscriber_id = %id, "Broadcast send failed");
                report.skipped += 1;
            }
        }

        tracing::debug!(
            delivered = report.delivered,
            skipped = report.skipped,
            "Broadcast payload"
        );
        Ok(report)
    }

    /// Send a payload directly to one subscriber
    pub async fn send_to(&self, id: &str, envelope: &Envelope) -> Result<(), HubError> {
        let text = envelope
            .to_json()
            .map_err(|e| HubError::Serialization(e.to_string()))?;

        let registry = self.registry.lock().await;
        let subscribers = registry.as_ref().ok_or(HubError::Unavailable)?;
        let handle = subscribers.get(id).ok_or(HubError::SubscriberNotFound)?;

        handle.sender.send(text).map_err(|_| HubError::SendFailed)
    }

    /// Get the current subscriber count
    pub async fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .await
            .as_ref()
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Whether the hub still accepts subscribers and broadcasts
    pub async fn is_available(&self) -> bool {
        self.registry.lock().await.is_some()
    }

    /// Drop every subscriber and refuse further use
    ///
    /// Dropping the senders ends each subscriber's writer task, which closes
    /// its socket.
    pub async fn shutdown(&self) {
        let dropped = self.registry.lock().await.take();
        if let Some(subscribers) = dropped {
            tracing::info!(subscribers = subscribers.len(), "Broadcast hub shut down");
        }
    }
}

/// Errors that can occur in the broadcast hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many subscribers (limit: {0})")]
    TooManyConnections(usize),

    #[error("Subscriber not found")]
    SubscriberNotFound,

    #[error("Failed to send message")]
    SendFailed,

    #[error("Subscriber registry unavailable")]
    Unavailable,

    #[error("Failed to serialize payload: {0}")]
    Serialization(String),
}

impl From<HubError> for RelayError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Unavailable => RelayError::RegistryUnavailable,
            HubError::Serialization(e) => RelayError::Serialization(e),
            other => RelayError::Transport(other.to_string()),
        }
    }
}
