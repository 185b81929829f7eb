use captionroom_protocol::{RoomId, SessionId, SignalKind};
use std::time::Duration;

/// Side effect requested by the state machine, executed in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Ask the media devices for camera and microphone
    AcquireMedia,
    /// Release camera and microphone
    ReleaseMedia,
    SetAudioEnabled(bool),
    SetVideoEnabled(bool),

    JoinRoom(RoomId),
    LeaveRoom,

    /// Create a peer connection toward `peer`; an initiator also produces
    /// the offer
    OpenPeer { peer: SessionId, initiator: bool },
    /// Hand an inbound negotiation payload to the open peer connection
    ApplyRemote {
        peer: SessionId,
        kind: SignalKind,
        payload: String,
    },
    /// Close and discard the peer connection toward `peer`
    ClosePeer { peer: SessionId },
    SendSignal {
        to: SessionId,
        kind: SignalKind,
        payload: String,
    },
    /// Deliver `NegotiationTimedOut { peer, attempt }` after `after`
    ArmNegotiationTimer {
        peer: SessionId,
        attempt: u32,
        after: Duration,
    },

    StartRecognition,
    StopRecognition,
    /// Deliver `RecognitionRestartDue { token }` after `after`
    ScheduleRecognitionRestart { after: Duration, token: u64 },
    SendCaption { room_id: RoomId, text: String },
}
