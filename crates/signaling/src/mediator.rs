//! Envelope relay and caption fan-out
//!
//! The mediator owns one outbound channel per connected session. It routes by
//! id only: payloads are forwarded untouched and room membership is read from
//! the registry, never changed here.

use crate::registry::RoomRegistry;
use captionroom_protocol::{CaptionMessage, ServerEvent, SessionId, SignalingEnvelope};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// What happened to a relayed envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Enqueued on the target's outbound channel
    Delivered,
    /// Target unknown or disconnected
    Dropped,
}

/// Routes envelopes and captions to per-session outbound channels
#[derive(Debug)]
pub struct SignalingMediator {
    registry: Arc<RoomRegistry>,
    outbound: DashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>,
}

impl SignalingMediator {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            outbound: DashMap::new(),
        }
    }

    /// Open the outbound channel for a session
    ///
    /// Registering an id again replaces the previous channel, which closes
    /// the old receiver.
    pub fn register(&self, session_id: &SessionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound.insert(session_id.clone(), tx);
        debug!("Registered outbound channel for session {}", session_id);
        rx
    }

    /// Close the outbound channel for a session; false if it was not registered
    pub fn unregister(&self, session_id: &SessionId) -> bool {
        let removed = self.outbound.remove(session_id).is_some();
        if removed {
            debug!("Unregistered outbound channel for session {}", session_id);
        }
        removed
    }

    /// Whether a session currently has an outbound channel
    pub fn is_connected(&self, session_id: &SessionId) -> bool {
        self.outbound.contains_key(session_id)
    }

    /// Number of registered sessions
    pub fn connection_count(&self) -> usize {
        self.outbound.len()
    }

    /// Push a server event to one session
    ///
    /// Never blocks, so it is safe to call while holding a room lock.
    pub fn notify(&self, to: &SessionId, event: ServerEvent) -> bool {
        // Clone the sender so no map guard is held while sending
        let tx = self.outbound.get(to).map(|r| r.value().clone());
        match tx {
            Some(tx) => {
                let method = event.method_name();
                if tx.send(event).is_ok() {
                    true
                } else {
                    debug!("Outbound channel for {} closed, dropping {}", to, method);
                    false
                }
            }
            None => {
                debug!(
                    "No outbound channel for {}, dropping {}",
                    to,
                    event.method_name()
                );
                false
            }
        }
    }

    /// Forward an envelope unmodified to `envelope.to`
    ///
    /// An unknown or disconnected target is not an error for the sender; the
    /// envelope is dropped and logged.
    pub fn relay(&self, envelope: SignalingEnvelope) -> RelayOutcome {
        let to = envelope.to.clone();
        let from = envelope.from.clone();
        let kind = envelope.kind;

        if self.notify(&to, ServerEvent::from(envelope)) {
            debug!("Relayed {} from {} to {}", kind, from, to);
            RelayOutcome::Delivered
        } else {
            debug!("Dropped {} from {}: target {} unavailable", kind, from, to);
            RelayOutcome::Dropped
        }
    }

    /// Send a caption to every other current member of its room
    ///
    /// Returns how many sessions it was delivered to.
    pub fn broadcast_caption(&self, message: CaptionMessage) -> usize {
        let event = ServerEvent::from(message.clone());

        let delivered = self
            .registry
            .members_of(&message.room_id)
            .iter()
            .filter(|member| **member != message.from)
            .filter(|member| self.notify(member, event.clone()))
            .count();

        debug!(
            "Caption from {} in room {} delivered to {} member(s)",
            message.from, message.room_id, delivered
        );
        delivered
    }
}
