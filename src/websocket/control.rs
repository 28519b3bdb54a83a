//! Reset Handshake (server side)
//!
//! A `reset` request clears application state through a [`ResetHandler`];
//! once that succeeds the hub broadcasts `reset_ack` to every subscriber.
//! What "application state" means is up to the handler.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::hub::{BroadcastHub, BroadcastReport};
use crate::protocol::{ControlMessage, Envelope, RelayResult};

/// Application hook invoked on a reset request
#[async_trait]
pub trait ResetHandler: Send + Sync {
    /// Clear application state
    async fn reset(&self) -> RelayResult<()>;
}

/// Reset handler for a relay with no application state of its own
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReset;

#[async_trait]
impl ResetHandler for LoggingReset {
    async fn reset(&self) -> RelayResult<()> {
        tracing::info!("Application reset requested");
        Ok(())
    }
}

/// Where a control message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOrigin {
    Subscriber,
    Producer,
}

impl fmt::Display for ControlOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlOrigin::Subscriber => f.write_str("subscriber"),
            ControlOrigin::Producer => f.write_str("producer"),
        }
    }
}

/// Handles control messages arriving at the relay
pub struct ControlHandshake {
    hub: Arc<BroadcastHub>,
    handler: Arc<dyn ResetHandler>,
}

impl fmt::Debug for ControlHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlHandshake").finish_non_exhaustive()
    }
}

impl ControlHandshake {
    pub fn new(hub: Arc<BroadcastHub>, handler: Arc<dyn ResetHandler>) -> Self {
        Self { hub, handler }
    }

    /// Process one control message
    ///
    /// Returns the broadcast report when a `reset_ack` was sent.
    pub async fn handle(
        &self,
        control: ControlMessage,
        origin: ControlOrigin,
    ) -> Option<BroadcastReport> {
        match control {
            ControlMessage::Reset => {
                tracing::info!(origin = %origin, "Reset requested");

                if let Err(e) = self.handler.reset().await {
                    tracing::error!(error = %e, "Application reset failed, not acknowledging");
                    return None;
                }

                match self
                    .hub
                    .broadcast(&Envelope::Control(ControlMessage::ResetAck))
                    .await
                {
                    Ok(report) => {
                        tracing::info!(subscribers = report.delivered, "Reset acknowledged");
                        Some(report)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to broadcast reset_ack");
                        None
                    }
                }
            }
            ControlMessage::ResetAck => {
                // Acknowledgements only flow from the relay outwards
                tracing::debug!(origin = %origin, "Ignoring inbound reset_ack");
                None
            }
        }
    }
}
