//! Transport-agnostic request dispatcher
//!
//! The WebSocket handler and in-process transports both drive a
//! [`SignalingHub`]: `connect` opens a session, `handle` executes one
//! request, `disconnect` tears the session down.

use crate::config::SignalingServerConfig;
use crate::error::{HubError, HubResult};
use crate::mediator::SignalingMediator;
use crate::registry::{JoinOutcome, RoomRegistry};
use crate::roles::RoleAssignment;
use captionroom_protocol::{
    CaptionMessage, CaptionParams, ClientCall, JoinParams, JoinResult, PeerParams, ServerEvent,
    SessionId, SignalParams, SignalingEnvelope,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A freshly opened session and the events addressed to it
#[derive(Debug)]
pub struct HubConnection {
    pub session_id: SessionId,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Shared state behind every signaling connection
#[derive(Debug, Clone)]
pub struct SignalingHub {
    config: Arc<SignalingServerConfig>,
    registry: Arc<RoomRegistry>,
    mediator: Arc<SignalingMediator>,
}

impl SignalingHub {
    pub fn new(config: SignalingServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.room_capacity));
        let mediator = Arc::new(SignalingMediator::new(Arc::clone(&registry)));
        Self {
            config: Arc::new(config),
            registry,
            mediator,
        }
    }

    pub fn config(&self) -> &SignalingServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn mediator(&self) -> &SignalingMediator {
        &self.mediator
    }

    /// Open a session with a server-assigned id
    pub fn connect(&self) -> HubConnection {
        let session_id = SessionId::generate();
        let events = self.mediator.register(&session_id);
        info!("Session {} connected", session_id);
        HubConnection { session_id, events }
    }

    /// Execute one request on behalf of `session_id`
    ///
    /// The sender of relayed envelopes and captions is always `session_id`;
    /// nothing in the request can claim another identity.
    pub fn handle(&self, session_id: &SessionId, call: ClientCall) -> HubResult<Value> {
        debug!("Session {} called {}", session_id, call.method_name());

        match call {
            ClientCall::Join(params) => self.join(session_id, params),
            ClientCall::Signal(params) => self.signal(session_id, params),
            ClientCall::Caption(params) => self.caption(session_id, params),
            ClientCall::Leave(params) => {
                if let Some(reason) = params.reason {
                    info!("Session {} leaving: {}", session_id, reason);
                }
                let left = self.leave(session_id);
                Ok(json!({"success": true, "left": left}))
            }
        }
    }

    fn join(&self, session_id: &SessionId, params: JoinParams) -> HubResult<Value> {
        let room_id = params.room_id;

        // Leave a previous room through the notifying path
        if self
            .registry
            .room_of(session_id)
            .is_some_and(|current| current != room_id)
        {
            self.leave(session_id);
        }

        let (outcome, ()) = self.registry.join_then(&room_id, session_id, |outcome| {
            if let Some(assignment) = RoleAssignment::assign(outcome, session_id) {
                info!(
                    "Room {}: {} initiates toward {}{}",
                    room_id,
                    assignment.initiator,
                    assignment.responder,
                    if assignment.late { " (late joiner)" } else { "" }
                );
                for (to, event) in assignment.notifications() {
                    self.mediator.notify(&to, event);
                }
            }
        });

        match outcome {
            JoinOutcome::Admitted { existing, .. } => {
                let result = JoinResult {
                    session_id: session_id.clone(),
                    room_id,
                    members: existing.into_iter().map(|m| m.session_id).collect(),
                };
                serde_json::to_value(result)
                    .map_err(|e| HubError::Internal(format!("Failed to encode join result: {}", e)))
            }
            JoinOutcome::Full { room_id, capacity } => {
                Err(HubError::RoomFull { room_id, capacity })
            }
        }
    }

    fn signal(&self, session_id: &SessionId, params: SignalParams) -> HubResult<Value> {
        if self.registry.room_of(session_id).is_none() {
            return Err(HubError::NotInRoom(
                "call room.join before signaling".to_string(),
            ));
        }

        if params.payload.len() > self.config.max_payload_bytes {
            return Err(HubError::InvalidParams(format!(
                "payload exceeds {} bytes",
                self.config.max_payload_bytes
            )));
        }

        let outcome = self.mediator.relay(SignalingEnvelope {
            from: session_id.clone(),
            to: params.target_id,
            kind: params.kind,
            payload: params.payload,
        });

        debug!("Signal from {}: {:?}", session_id, outcome);
        Ok(json!({"success": true}))
    }

    fn caption(&self, session_id: &SessionId, params: CaptionParams) -> HubResult<Value> {
        if self.registry.room_of(session_id).as_ref() != Some(&params.room_id) {
            return Err(HubError::NotInRoom(format!(
                "not a member of room {}",
                params.room_id
            )));
        }

        if params.text.len() > self.config.max_caption_bytes {
            return Err(HubError::InvalidParams(format!(
                "caption exceeds {} bytes",
                self.config.max_caption_bytes
            )));
        }

        let delivered = self.mediator.broadcast_caption(CaptionMessage::new(
            params.room_id,
            session_id.clone(),
            params.text,
        ));

        Ok(json!({"success": true, "delivered": delivered}))
    }

    /// Remove a session from its room and tell the remaining members
    ///
    /// If the session was half of the active pair, the two oldest remaining
    /// members are paired next. The session keeps its outbound channel. Returns false when the
    /// session was not in a room.
    pub fn leave(&self, session_id: &SessionId) -> bool {
        self.registry
            .leave_then(session_id, |departure| {
                for peer in &departure.remaining {
                    self.mediator.notify(
                        peer,
                        ServerEvent::PeerLeft(PeerParams {
                            peer_id: departure.session_id.clone(),
                        }),
                    );
                }

                if let Some(assignment) = RoleAssignment::reassign(departure) {
                    info!(
                        "Room {}: re-pairing, {} initiates toward {}",
                        departure.room_id, assignment.initiator, assignment.responder
                    );
                    for (to, event) in assignment.notifications() {
                        self.mediator.notify(&to, event);
                    }
                }
            })
            .is_some()
    }

    /// Tear a session down completely; safe to call more than once
    pub fn disconnect(&self, session_id: &SessionId) {
        let left = self.leave(session_id);
        let registered = self.mediator.unregister(session_id);

        if left || registered {
            info!("Session {} disconnected", session_id);
        } else {
            debug!("Session {} already disconnected", session_id);
        }
    }
}
