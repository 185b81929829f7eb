//! Room, session and message types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Opaque room identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random room id, for "create new room" flows
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque identifier of one client's participation, unique per connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Negotiation role of a session toward its peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Proposes the first connection description (sends the offer)
    Initiator,
    /// Waits for the offer and answers it
    Responder,
    /// Alone in the room, waiting for a peer
    #[default]
    Unassigned,
}

/// Client-side connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Session created, nothing started
    #[default]
    Idle,
    /// Waiting for camera/microphone
    AcquiringMedia,
    /// Offer/answer exchange in progress
    Negotiating,
    /// Media path established with the peer
    Connected,
    /// Peer connection released
    Closed,
    /// Media, signaling or negotiation failure
    Errored,
}

impl ConnectionState {
    /// Whether the session is still able to reach `Connected`
    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }
}

/// Kind of negotiation payload carried by a [`SignalingEnvelope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        };
        f.write_str(s)
    }
}

/// Connection-negotiation message routed by id
///
/// The relay never looks inside `payload`; only `from`/`to` are used for routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    pub from: SessionId,
    pub to: SessionId,
    pub kind: SignalKind,
    pub payload: String,
}

/// Recognized caption text published to the rest of a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionMessage {
    pub room_id: RoomId,
    pub from: SessionId,
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl CaptionMessage {
    /// Create a caption stamped with the current time
    pub fn new(room_id: RoomId, from: SessionId, text: impl Into<String>) -> Self {
        Self {
            room_id,
            from,
            text: text.into(),
            timestamp: now_millis(),
        }
    }
}

/// Current Unix timestamp in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
