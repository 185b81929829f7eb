//! Signaling and session coordination for two-party caption rooms
//!
//! Groups connections into rooms, decides who sends the first offer, relays
//! opaque negotiation payloads between exactly the right two sessions and
//! fans caption text out to the rest of a room.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Browser / native clients                            │
//! │  ↓ (JSON-RPC 2.0 over WebSocket)                     │
//! │  WebSocketSignalingServer                            │
//! │  └─ SignalingHub (one per server)                    │
//! │     ├─ RoomRegistry   (room → members, per-room lock)│
//! │     ├─ RoleAssignment (initiator / responder)        │
//! │     └─ SignalingMediator (relay + caption fan-out)   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use captionroom_protocol::{ClientCall, JoinParams, RoomId, ServerEvent};
//! use captionroom_signaling::{SignalingHub, SignalingServerConfig};
//!
//! let hub = SignalingHub::new(SignalingServerConfig::default());
//! let mut alice = hub.connect();
//! let mut bob = hub.connect();
//!
//! let join = |room: &str| ClientCall::Join(JoinParams { room_id: RoomId::new(room) });
//! hub.handle(&alice.session_id, join("abc")).unwrap();
//! hub.handle(&bob.session_id, join("abc")).unwrap();
//!
//! // Alice was already present, so she is told to initiate toward Bob
//! assert!(matches!(alice.events.try_recv(), Ok(ServerEvent::PeerJoined(_))));
//! assert!(matches!(bob.events.try_recv(), Ok(ServerEvent::RoleAssigned(_))));
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod hub;
pub mod mediator;
pub mod registry;
pub mod roles;
pub mod websocket;

pub use config::SignalingServerConfig;
pub use error::{HubError, HubResult};
pub use hub::{HubConnection, SignalingHub};
pub use mediator::{RelayOutcome, SignalingMediator};
pub use registry::{Departure, JoinOutcome, Member, RoomRegistry};
pub use roles::{Assignment, RoleAssignment};
pub use websocket::{WebSocketServerHandle, WebSocketSignalingServer};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
