//! Request-level errors reported back to a client

use captionroom_protocol::{error_codes, JsonRpcError, RoomId};
use serde_json::{json, Value};

/// Result type alias for hub request handling
pub type HubResult<T> = std::result::Result<T, HubError>;

/// Errors a request can fail with; each maps to a JSON-RPC error code
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HubError {
    /// Request requires the session to be a member of a room
    #[error("Not in room: {0}")]
    NotInRoom(String),

    /// Room already holds its maximum number of sessions
    #[error("Room {room_id} is full ({capacity} sessions)")]
    RoomFull {
        /// Room that rejected the join
        room_id: RoomId,
        /// Configured capacity
        capacity: usize,
    },

    /// Invalid request parameters
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Server-side failure unrelated to the request contents
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// JSON-RPC error code for this error
    pub fn code(&self) -> i32 {
        match self {
            HubError::NotInRoom(_) => error_codes::NOT_IN_ROOM,
            HubError::RoomFull { .. } => error_codes::ROOM_FULL,
            HubError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            HubError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// Convert into a JSON-RPC error reply for request `id`
    pub fn to_rpc_error(&self, id: Value) -> JsonRpcError {
        match self {
            HubError::RoomFull { room_id, capacity } => JsonRpcError::with_data(
                self.code(),
                self.to_string(),
                json!({"room_id": room_id, "capacity": capacity}),
                id,
            ),
            _ => JsonRpcError::new(self.code(), self.to_string(), id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            HubError::NotInRoom("x".into()).code(),
            error_codes::NOT_IN_ROOM
        );
        assert_eq!(
            HubError::InvalidParams("x".into()).code(),
            error_codes::INVALID_PARAMS
        );
    }

    #[test]
    fn test_room_full_carries_data() {
        let err = HubError::RoomFull {
            room_id: RoomId::new("abc"),
            capacity: 2,
        };
        let rpc = err.to_rpc_error(json!(9));
        assert_eq!(rpc.error.code, error_codes::ROOM_FULL);
        assert_eq!(rpc.error.data, Some(json!({"room_id": "abc", "capacity": 2})));
        assert_eq!(rpc.id, json!(9));
    }
}
