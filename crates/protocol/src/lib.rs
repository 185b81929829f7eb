//! Shared data model and wire protocol for captionroom
//!
//! Two clients in a room negotiate a direct audio/video connection and
//! exchange live captions through a signaling server. This crate holds the
//! pieces both sides agree on:
//!
//! - **Identifiers**: [`RoomId`] and [`SessionId`] opaque string newtypes
//! - **Data model**: [`SignalingEnvelope`], [`CaptionMessage`], [`Role`],
//!   [`ConnectionState`]
//! - **JSON-RPC 2.0 signaling**: closed [`ClientCall`] / [`ServerEvent`] enums
//!   exchanged over a persistent connection
//!
//! # Example
//!
//! ```
//! use captionroom_protocol::{ClientCall, JoinParams, RoomId};
//!
//! let call = ClientCall::Join(JoinParams { room_id: RoomId::new("abc") });
//! let json = call.to_request(Some(1.into())).unwrap();
//! assert!(json.contains("\"method\":\"room.join\""));
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod model;
pub mod protocol;

pub use error::{Error, Result};
pub use model::{
    now_millis, CaptionMessage, ConnectionState, Role, RoomId, SessionId, SignalKind,
    SignalingEnvelope,
};
pub use protocol::{
    error_codes, CaptionParams, CaptionRelayedParams, ClientCall, ErrorObject, JoinParams,
    JoinResult, JsonRpcError, JsonRpcResponse, LeaveParams, PeerParams, RoleAssignedParams, ServerEvent,
    ServerFrame, SignalParams, SignalRelayedParams, JSONRPC_VERSION,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
