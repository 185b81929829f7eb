//! Signaling transports
//!
//! Both transports hand back the receiving half as a channel of
//! [`ServerFrame`](captionroom_protocol::ServerFrame)s, ready for
//! [`spawn_session`](crate::runtime::spawn_session). The channel closes when
//! the connection is gone.

mod local;
mod websocket;

pub use local::LocalTransport;
pub use websocket::SignalingClient;
