//! WebSocket signaling server for JSON-RPC 2.0 protocol
//!
//! Each accepted connection becomes one hub session; text frames are decoded
//! into [`ClientCall`](captionroom_protocol::ClientCall)s and answered with a
//! JSON-RPC response or error, while server events for the session are
//! written to the same socket as notifications.

mod handler;
mod server;

pub use handler::handle_connection;
pub use server::{WebSocketServerHandle, WebSocketSignalingServer};
