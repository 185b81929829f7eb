//! Per-session state machine
//!
//! Every asynchronous input (media ready, inbound envelope, recognition
//! result, user toggle, timer) becomes a [`SessionEvent`]. A single
//! transition function, [`SessionState::apply`], updates the session and
//! returns the [`Effect`]s to perform. Nothing in here does I/O.

mod effect;
mod event;
mod state;

pub use effect::Effect;
pub use event::SessionEvent;
pub use state::{SessionState, SessionView};
