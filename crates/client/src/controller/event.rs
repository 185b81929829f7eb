use crate::error::ClientError;
use captionroom_protocol::{Role, ServerEvent, SessionId, SignalKind};

/// Input to the session state machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// User opened the session
    Start,
    MediaReady,
    MediaFailed(ClientError),

    /// Server accepted the join and assigned this connection an id
    Joined { session_id: SessionId },
    /// Server answered a request with an error
    ///
    /// Responses arrive in request order, so an error seen before `Joined`
    /// is the answer to the join.
    RequestFailed(ClientError),
    /// Signaling connection is gone
    SignalingClosed,

    /// Role and target decided by the server
    PeerAssigned { peer: SessionId, role: Role },
    /// Inbound negotiation envelope
    SignalReceived {
        from: SessionId,
        kind: SignalKind,
        payload: String,
    },
    /// Caption text from another room member
    CaptionReceived { from: SessionId, text: String },
    PeerLeft { peer: SessionId },

    /// Local peer connection produced a description to send
    LocalDescription {
        peer: SessionId,
        kind: SignalKind,
        payload: String,
    },
    /// Local peer connection gathered an ICE candidate
    LocalCandidate { peer: SessionId, payload: String },
    /// Local peer connection rejected a description or could not be created
    NegotiationFailed { peer: SessionId, error: ClientError },
    ConnectionEstablished { peer: SessionId },
    ConnectionClosed { peer: SessionId },
    NegotiationTimedOut { peer: SessionId, attempt: u32 },

    /// Recognizer result; interim and final results both replace the caption
    Transcript { text: String, is_final: bool },
    RecognitionFailed(ClientError),
    /// Recognizer finished stopping, or ended on its own
    RecognitionStopped,
    RecognitionRestartDue { token: u64 },

    ToggleMic,
    ToggleVideo,
    /// Local leave; ends the session
    Leave,
}

impl From<ServerEvent> for SessionEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            // Late and regular joins take the same assignment path
            ServerEvent::PeerJoined(params) | ServerEvent::PeerJoinedLate(params) => {
                SessionEvent::PeerAssigned {
                    peer: params.peer_id,
                    role: Role::Initiator,
                }
            }
            ServerEvent::RoleAssigned(params) => SessionEvent::PeerAssigned {
                peer: params.peer_id,
                role: if params.initiator {
                    Role::Initiator
                } else {
                    Role::Responder
                },
            },
            ServerEvent::SignalRelayed(params) => SessionEvent::SignalReceived {
                from: params.from_id,
                kind: params.kind,
                payload: params.payload,
            },
            ServerEvent::CaptionRelayed(params) => SessionEvent::CaptionReceived {
                from: params.from_id,
                text: params.text,
            },
            ServerEvent::PeerLeft(params) => SessionEvent::PeerLeft {
                peer: params.peer_id,
            },
        }
    }
}
