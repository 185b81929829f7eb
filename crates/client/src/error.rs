//! Error types for client sessions

use captionroom_protocol::error_codes;

/// Result type alias using the client Error
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors a client session can run into
///
/// None of these end the process; the session controller decides per kind
/// whether the call continues, the negotiation attempt is dropped, or the
/// session stops.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// Camera or microphone denied or unavailable
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Speech recognition engine failure or unsupported
    #[error("Recognition error: {0}")]
    Recognition(String),

    /// Peer connection could not produce or apply a description
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Unexpected or malformed signaling message
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Peer never reached Connected within the allowed attempts
    #[error("Negotiation timed out after {attempts} attempt(s)")]
    NegotiationTimeout {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Room already holds its maximum number of sessions
    #[error("Room is full: {0}")]
    RoomFull(String),

    /// Signaling transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol encoding or configuration failure
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<captionroom_protocol::Error> for ClientError {
    fn from(e: captionroom_protocol::Error) -> Self {
        match e {
            captionroom_protocol::Error::Remote { code, message }
                if code == error_codes::ROOM_FULL =>
            {
                ClientError::RoomFull(message)
            }
            remote @ captionroom_protocol::Error::Remote { .. } => {
                ClientError::Signaling(remote.to_string())
            }
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

impl From<webrtc::Error> for ClientError {
    fn from(e: webrtc::Error) -> Self {
        ClientError::Negotiation(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}
