//! Subscriber-facing WebSocket side of the relay
//!
//! ## Architecture
//!
//! - **BroadcastHub**: Holds connected subscribers and fans payloads out
//! - **ControlHandshake**: Handles `reset` requests and broadcasts `reset_ack`
//! - **Handler**: Handles WebSocket upgrade and per-connection I/O
//!
//! ## Usage
//!
//! Subscribers connect to `/ws` and receive every validated message as JSON
//! text. The only payload a subscriber sends is the reset request:
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:3000/ws');
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   if (msg.type === 'reset_ack') { reinitialize(); return; }
//!   show(msg.text, msg.audio);
//! };
//!
//! ws.send(JSON.stringify({type: 'reset'}));
//! ```

mod control;
mod handler;
mod hub;

pub use control::{ControlHandshake, ControlOrigin, LoggingReset, ResetHandler};
pub use handler::websocket_handler;
pub use hub::{BroadcastHub, BroadcastReport, HubConfig, HubError, SubscriberId};
