//! Relay Wire Protocol
//!
//! Message shapes shared by producers, the hub and subscribers:
//!
//! - Ordinary: `{"text": "<string>", "audio": "<string, optional>"}`
//! - Control request: `{"type": "reset"}`
//! - Control acknowledgement: `{"type": "reset_ack"}`
//!
//! Every inbound payload goes through [`parse_frame`] / [`parse_text`],
//! which discriminate control messages before checking the ordinary shape.

mod error;
mod messages;
mod validator;

pub use error::{RelayError, RelayResult};
pub use messages::{ControlMessage, Envelope, Message};
pub use validator::{parse_frame, parse_text};
