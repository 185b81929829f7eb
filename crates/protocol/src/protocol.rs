//! JSON-RPC 2.0 signaling protocol types
//!
//! Requests and notifications are closed enums tagged by `method`, so both the
//! server handler and the client dispatch with an exhaustive `match` instead
//! of comparing method-name strings.

use crate::model::{CaptionMessage, RoomId, SessionId, SignalKind, SignalingEnvelope};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Result data
    pub result: Value,

    /// Request ID this response corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Error details
    pub error: ErrorObject,

    /// Request ID this error corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Room-specific error codes

    /// Request requires room membership (call room.join first)
    pub const NOT_IN_ROOM: i32 = -32010;

    /// Room already holds its maximum number of sessions
    pub const ROOM_FULL: i32 = -32011;
}

/// Requests a client sends to the signaling server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum ClientCall {
    /// Join (or create) a room
    #[serde(rename = "room.join")]
    Join(JoinParams),

    /// Relay a negotiation payload to another session
    #[serde(rename = "signal")]
    Signal(SignalParams),

    /// Publish caption text to the rest of the room
    #[serde(rename = "caption")]
    Caption(CaptionParams),

    /// Leave the current room
    #[serde(rename = "room.leave")]
    Leave(LeaveParams),
}

/// Parameters for room.join
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinParams {
    pub room_id: RoomId,
}

/// Result of a successful room.join
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinResult {
    /// Id the server assigned to this connection
    pub session_id: SessionId,
    pub room_id: RoomId,
    /// Other members present when the join committed
    pub members: Vec<SessionId>,
}

/// Parameters for signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalParams {
    /// Recipient session
    pub target_id: SessionId,
    pub kind: SignalKind,
    /// Opaque negotiation payload
    pub payload: String,
}

/// Parameters for caption
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptionParams {
    pub room_id: RoomId,
    pub text: String,
}

/// Parameters for room.leave
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LeaveParams {
    /// Optional leave reason, logged by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Notifications the signaling server pushes to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum ServerEvent {
    /// A newcomer arrived; the receiver becomes Initiator toward it
    #[serde(rename = "peer.joined")]
    PeerJoined(PeerParams),

    /// A newcomer arrived after the receiver already negotiated with an
    /// earlier peer; handled exactly like `peer.joined`
    #[serde(rename = "peer.joined_late")]
    PeerJoinedLate(PeerParams),

    /// Role and target for a newcomer
    #[serde(rename = "role.assigned")]
    RoleAssigned(RoleAssignedParams),

    /// Inbound negotiation envelope
    #[serde(rename = "signal.relayed")]
    SignalRelayed(SignalRelayedParams),

    /// Inbound caption from another room member
    #[serde(rename = "caption.relayed")]
    CaptionRelayed(CaptionRelayedParams),

    /// A room member disconnected or left
    #[serde(rename = "peer.left")]
    PeerLeft(PeerParams),
}

/// Parameters naming a single peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerParams {
    pub peer_id: SessionId,
}

/// Parameters for role.assigned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleAssignedParams {
    pub initiator: bool,
    pub peer_id: SessionId,
}

/// Parameters for signal.relayed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRelayedParams {
    pub from_id: SessionId,
    pub kind: SignalKind,
    pub payload: String,
}

/// Parameters for caption.relayed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptionRelayedParams {
    pub from_id: SessionId,
    pub text: String,
    pub timestamp: u64,
}

impl From<SignalingEnvelope> for ServerEvent {
    fn from(envelope: SignalingEnvelope) -> Self {
        ServerEvent::SignalRelayed(SignalRelayedParams {
            from_id: envelope.from,
            kind: envelope.kind,
            payload: envelope.payload,
        })
    }
}

impl From<CaptionMessage> for ServerEvent {
    fn from(message: CaptionMessage) -> Self {
        ServerEvent::CaptionRelayed(CaptionRelayedParams {
            from_id: message.from,
            text: message.text,
            timestamp: message.timestamp,
        })
    }
}

/// Serialize an adjacently tagged message and stamp the JSON-RPC envelope fields
fn to_jsonrpc_object<T: Serialize>(message: &T, id: Option<Value>) -> Result<Map<String, Value>> {
    match serde_json::to_value(message)? {
        Value::Object(mut map) => {
            map.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
            if let Some(id) = id {
                map.insert("id".to_string(), id);
            }
            Ok(map)
        }
        other => Err(Error::Serialization(format!(
            "Expected a JSON object, got {}",
            other
        ))),
    }
}

impl ClientCall {
    /// Every method name a server accepts
    pub const METHODS: [&'static str; 4] = ["room.join", "signal", "caption", "room.leave"];

    /// Encode as a JSON-RPC request; `id: None` sends a notification
    pub fn to_request(&self, id: Option<Value>) -> Result<String> {
        let map = to_jsonrpc_object(self, id)?;
        Ok(serde_json::to_string(&map)?)
    }

    /// Decode a JSON-RPC request, returning the call and its request id
    ///
    /// Failures come back as a ready-to-send [`JsonRpcError`] carrying the
    /// matching standard error code.
    pub fn from_request(text: &str) -> std::result::Result<(Self, Value), JsonRpcError> {
        let mut value: Value = serde_json::from_str(text).map_err(|e| {
            JsonRpcError::new(
                error_codes::PARSE_ERROR,
                format!("Failed to parse JSON: {}", e),
                Value::Null,
            )
        })?;

        let id = value.get("id").cloned().unwrap_or(Value::Null);

        let object = match value.as_object_mut() {
            Some(object) => object,
            None => {
                return Err(JsonRpcError::new(
                    error_codes::INVALID_REQUEST,
                    "Request must be a JSON object".to_string(),
                    id,
                ))
            }
        };

        let method = match object.get("method").and_then(Value::as_str) {
            Some(method) => method.to_string(),
            None => {
                return Err(JsonRpcError::new(
                    error_codes::INVALID_REQUEST,
                    "Missing method".to_string(),
                    id,
                ))
            }
        };

        if !Self::METHODS.contains(&method.as_str()) {
            return Err(JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Unknown method: {}", method),
                id,
            ));
        }

        // room.leave may omit params entirely or send null
        let params = object
            .entry("params")
            .or_insert_with(|| Value::Object(Map::new()));
        if params.is_null() {
            *params = Value::Object(Map::new());
        }

        let call = serde_json::from_value(value).map_err(|e| {
            JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Invalid params for {}: {}", method, e),
                id.clone(),
            )
        })?;

        Ok((call, id))
    }

    /// Get the method name
    pub fn method_name(&self) -> &'static str {
        match self {
            ClientCall::Join(_) => "room.join",
            ClientCall::Signal(_) => "signal",
            ClientCall::Caption(_) => "caption",
            ClientCall::Leave(_) => "room.leave",
        }
    }
}

impl ServerEvent {
    /// Encode as a JSON-RPC notification
    pub fn to_json(&self) -> Result<String> {
        let map = to_jsonrpc_object(self, None)?;
        Ok(serde_json::to_string(&map)?)
    }

    /// Get the method name
    pub fn method_name(&self) -> &'static str {
        match self {
            ServerEvent::PeerJoined(_) => "peer.joined",
            ServerEvent::PeerJoinedLate(_) => "peer.joined_late",
            ServerEvent::RoleAssigned(_) => "role.assigned",
            ServerEvent::SignalRelayed(_) => "signal.relayed",
            ServerEvent::CaptionRelayed(_) => "caption.relayed",
            ServerEvent::PeerLeft(_) => "peer.left",
        }
    }
}

/// Anything a client can receive from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Server-initiated notification
    Event(ServerEvent),
    /// Successful reply to a request
    Response(JsonRpcResponse),
    /// Error reply to a request
    Error(JsonRpcError),
}

impl ServerFrame {
    /// Classify and decode an inbound server message
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        if value.get("method").is_some() {
            let event = serde_json::from_value(value)
                .map_err(|e| Error::Protocol(format!("Unknown notification: {}", e)))?;
            Ok(ServerFrame::Event(event))
        } else if value.get("error").is_some() {
            Ok(ServerFrame::Error(serde_json::from_value(value)?))
        } else if value.get("result").is_some() {
            Ok(ServerFrame::Response(serde_json::from_value(value)?))
        } else {
            Err(Error::Protocol(format!("Unrecognized frame: {}", text)))
        }
    }
}

impl JsonRpcResponse {
    /// Create a new JSON-RPC response
    pub fn new(result: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::Serialization(format!("Failed to serialize JSON-RPC response: {}", e))
        })
    }
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i32, message: String, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code,
                message,
                data: None,
            },
            id,
        }
    }

    /// Create a new JSON-RPC error with data
    pub fn with_data(code: i32, message: String, data: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code,
                message,
                data: Some(data),
            },
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::Serialization(format!("Failed to serialize JSON-RPC error: {}", e))
        })
    }
}

impl From<JsonRpcError> for Error {
    fn from(e: JsonRpcError) -> Self {
        Error::Remote {
            code: e.error.code,
            message: e.error.message,
        }
    }
}
