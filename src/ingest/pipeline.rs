//! Frame dispatch
//!
//! Routes each extracted frame: ordinary messages go to the hub, control
//! messages to the reset handshake, anything invalid is logged and dropped.

use std::sync::Arc;

use super::frame::Frame;
use crate::protocol::{parse_frame, Envelope, RelayError};
use crate::websocket::{BroadcastHub, ControlHandshake, ControlOrigin};

/// What happened to a dispatched frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Broadcast to this many subscribers
    Broadcast(usize),
    /// Handled by the reset handshake
    Control,
    /// Dropped (malformed, invalid shape, or hub unavailable)
    Dropped,
}

/// Shared by every producer connection
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    hub: Arc<BroadcastHub>,
    handshake: Arc<ControlHandshake>,
}

impl IngestPipeline {
    pub fn new(hub: Arc<BroadcastHub>, handshake: Arc<ControlHandshake>) -> Self {
        Self { hub, handshake }
    }

    /// Validate one frame and route it
    pub async fn dispatch(&self, frame: &Frame) -> Dispatch {
        match parse_frame(frame.as_bytes()) {
            Ok(Envelope::Control(control)) => {
                self.handshake.handle(control, ControlOrigin::Producer).await;
                Dispatch::Control
            }
            Ok(envelope @ Envelope::Message(_)) => match self.hub.broadcast(&envelope).await {
                Ok(report) => Dispatch::Broadcast(report.delivered),
                Err(e) => {
                    let err = RelayError::from(e);
                    tracing::warn!(error = %err, "Broadcast failed, message dropped");
                    Dispatch::Dropped
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, frame = %frame.as_text(), "Dropping invalid frame");
                Dispatch::Dropped
            }
        }
    }
}
