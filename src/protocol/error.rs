//! Relay error types
//!
//! Every failure the relay can observe falls into one of these buckets.
//! None of them is fatal to the relay process: malformed input is dropped,
//! transport failures end the affected connection only.

use thiserror::Error;

/// Errors that can occur while relaying messages
#[derive(Error, Debug)]
pub enum RelayError {
    /// Orphan closing brace, oversized frame or unparseable JSON
    #[error("Malformed frame: {0}")]
    FrameMalformed(String),

    /// Valid JSON that does not have the expected message shape
    #[error("Invalid message shape: {0}")]
    ShapeInvalid(String),

    /// Producer or subscriber connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Broadcast attempted while the subscriber registry is not available
    #[error("Subscriber registry unavailable")]
    RegistryUnavailable,

    /// Outbound payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::ShapeInvalid("missing required field `text`".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid message shape: missing required field `text`"
        );

        assert_eq!(
            RelayError::RegistryUnavailable.to_string(),
            "Subscriber registry unavailable"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let relay_err: RelayError = io_err.into();
        assert!(matches!(relay_err, RelayError::Io(_)));
    }
}
