//! Wire Message Types
//!
//! Ordinary messages and control messages share one JSON envelope on the
//! subscriber channel. Control messages are recognised by their `type` field.

use serde::{Deserialize, Serialize};

use super::error::RelayResult;

/// A validated message relayed from a producer to subscribers
///
/// `audio` is an opaque reference (URL or path) that the relay never
/// interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message body
    pub text: String,
    /// Optional audio reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl Message {
    /// Create a text-only message
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            audio: None,
        }
    }

    /// Attach an audio reference
    pub fn with_audio(mut self, audio: impl Into<String>) -> Self {
        self.audio = Some(audio.into());
        self
    }
}

/// Reset handshake messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Subscriber asks the server to clear application state
    Reset,
    /// Server confirms the reset to every subscriber
    ResetAck,
}

impl ControlMessage {
    /// Value of the `type` discriminator on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMessage::Reset => "reset",
            ControlMessage::ResetAck => "reset_ack",
        }
    }

    /// Look up a control message by its `type` value
    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            "reset" => Some(ControlMessage::Reset),
            "reset_ack" => Some(ControlMessage::ResetAck),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can travel over the subscriber channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Control(ControlMessage),
    Message(Message),
}

impl Envelope {
    /// Serialize to the JSON text sent over the wire
    pub fn to_json(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Envelope::Message(message)
    }
}

impl From<ControlMessage> for Envelope {
    fn from(control: ControlMessage) -> Self {
        Envelope::Control(control)
    }
}
