//! Client session controller for captionroom
//!
//! One session is one participant in one room. Its behavior is split into
//! a pure state machine and the code that carries out what it decides:
//!
//! - [`controller::SessionState`]: `apply(event, now) -> Vec<Effect>`, no I/O
//! - [`recognition::RecognitionGate`]: debounced start/stop of the recognizer
//! - [`runtime`]: a single task per session that feeds events into the state
//!   machine and executes the returned effects in order against the
//!   [`collaborators`] (media devices, recognizer, peer connector, signaling)
//! - [`transport`]: WebSocket and in-process signaling transports
//! - [`webrtc_peer`]: a webrtc-rs backed [`collaborators::PeerConnector`]
//!
//! # Example
//!
//! ```
//! use captionroom_client::controller::{Effect, SessionEvent, SessionState};
//! use captionroom_client::ClientConfig;
//! use captionroom_protocol::RoomId;
//! use tokio::time::Instant;
//!
//! let mut state = SessionState::new(RoomId::new("abc"), &ClientConfig::default());
//! let effects = state.apply(SessionEvent::Start, Instant::now());
//! assert_eq!(effects, vec![Effect::AcquireMedia]);
//! ```

#![warn(clippy::all)]

pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod recognition;
pub mod runtime;
pub mod transport;
pub mod webrtc_peer;

pub use collaborators::{
    LocalMedia, MediaDevices, PeerConnector, PeerEvents, PeerLink, RecognitionHandle,
    RecognitionSink, Recognizer, SignalingTransport,
};
pub use config::{ClientConfig, TurnServerConfig};
pub use controller::{Effect, SessionEvent, SessionState, SessionView};
pub use error::{ClientError, Result};
pub use runtime::{spawn_session, SessionDeps, SessionHandle};
pub use transport::{LocalTransport, SignalingClient};
pub use webrtc_peer::WebRtcPeerConnector;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
