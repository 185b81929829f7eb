//! Configuration for the signaling server

use captionroom_protocol::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Upper bound for [`SignalingServerConfig::room_capacity`]
pub const MAX_ROOM_CAPACITY: usize = 8;

/// Main configuration for the signaling server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingServerConfig {
    /// Address the WebSocket listener binds to (default: 0.0.0.0:8080)
    pub bind_address: String,

    /// Maximum sessions admitted to one room (default: 2, range: 2-8)
    ///
    /// Negotiation is always two-party; sessions beyond the second only
    /// take part in caption fan-out.
    pub room_capacity: usize,

    /// Maximum accepted caption length in bytes (default: 4096)
    pub max_caption_bytes: usize,

    /// Maximum accepted negotiation payload size in bytes (default: 65536)
    pub max_payload_bytes: usize,
}

impl Default for SignalingServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            room_capacity: 2,
            max_caption_bytes: 4096,
            max_payload_bytes: 64 * 1024,
        }
    }
}

impl SignalingServerConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `bind_address` is not a socket address
    /// - `room_capacity` is not in range 2-8
    /// - `max_caption_bytes` or `max_payload_bytes` is zero
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.parse::<SocketAddr>().is_err() {
            return Err(Error::InvalidConfig(format!(
                "bind_address must be host:port, got {}",
                self.bind_address
            )));
        }

        if !(2..=MAX_ROOM_CAPACITY).contains(&self.room_capacity) {
            return Err(Error::InvalidConfig(format!(
                "room_capacity must be in range 2-{}, got {}",
                MAX_ROOM_CAPACITY, self.room_capacity
            )));
        }

        if self.max_caption_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_caption_bytes must be positive".to_string(),
            ));
        }

        if self.max_payload_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_payload_bytes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Set the bind address
    ///
    /// Useful for chaining with `default()`.
    pub fn with_bind_address(mut self, bind_address: &str) -> Self {
        self.bind_address = bind_address.to_string();
        self
    }

    /// Set the room capacity
    pub fn with_room_capacity(mut self, room_capacity: usize) -> Self {
        self.room_capacity = room_capacity;
        self
    }
}
