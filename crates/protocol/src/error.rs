//! Error types shared by the signaling server and clients

/// Result type alias using the protocol Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding signaling messages
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Message was well-formed JSON but not a known request or notification
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Server answered a request with a JSON-RPC error object
    #[error("Remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i32,
        /// Human-readable message
        message: String,
    },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::Remote {
            code: -32011,
            message: "Room full".to_string(),
        };
        assert_eq!(err.to_string(), "Remote error -32011: Room full");
    }

    #[test]
    fn test_serde_error_conversion() {
        let serde_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = Error::from(serde_err);
        assert!(matches!(err, Error::Serialization(_)));
    }
}
