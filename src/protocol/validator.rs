//! Message Validator
//!
//! Turns raw frame text into an [`Envelope`]. The control discriminator is
//! checked before the ordinary message shape, so a `reset` / `reset_ack`
//! payload can never reach an ordinary message callback.
//!
//! Validation is all-or-nothing: there is no coercion of wrongly typed
//! fields.

use serde_json::{Map, Value};

use super::error::{RelayError, RelayResult};
use super::messages::{ControlMessage, Envelope, Message};

/// Parse and validate a frame's raw bytes
pub fn parse_frame(bytes: &[u8]) -> RelayResult<Envelope> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| RelayError::FrameMalformed(e.to_string()))?;
    classify(value)
}

/// Parse and validate a text payload received over a channel
pub fn parse_text(text: &str) -> RelayResult<Envelope> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RelayError::FrameMalformed(e.to_string()))?;
    classify(value)
}

fn classify(value: Value) -> RelayResult<Envelope> {
    let Value::Object(mut fields) = value else {
        return Err(RelayError::ShapeInvalid(format!(
            "expected a JSON object, got {}",
            kind(&value)
        )));
    };

    if let Some(control) = control_type(&fields) {
        return Ok(Envelope::Control(control));
    }

    let text = match fields.remove("text") {
        Some(Value::String(text)) => text,
        Some(other) => {
            return Err(RelayError::ShapeInvalid(format!(
                "`text` must be a string, got {}",
                kind(&other)
            )))
        }
        None => {
            return Err(RelayError::ShapeInvalid(
                "missing required field `text`".to_string(),
            ))
        }
    };

    let audio = match fields.remove("audio") {
        None | Some(Value::Null) => None,
        Some(Value::String(audio)) => Some(audio),
        Some(other) => {
            return Err(RelayError::ShapeInvalid(format!(
                "`audio` must be a string, got {}",
                kind(&other)
            )))
        }
    };

    Ok(Envelope::Message(Message { text, audio }))
}

/// Recognised control discriminator, if any
fn control_type(fields: &Map<String, Value>) -> Option<ControlMessage> {
    fields
        .get("type")
        .and_then(Value::as_str)
        .and_then(ControlMessage::from_type)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
