//! Interfaces to everything a session drives but does not own
//!
//! The runtime only talks to devices, the speech engine, the peer connection
//! stack and the signaling server through these traits. Tests plug in fakes;
//! [`crate::webrtc_peer::WebRtcPeerConnector`] and the transports in
//! [`crate::transport`] are the real implementations shipped here.

use crate::controller::SessionEvent;
use crate::error::Result;
use async_trait::async_trait;
use captionroom_protocol::{ClientCall, SessionId, SignalKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Camera and microphone access
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire audio and video; fails on denial or missing devices
    async fn acquire(&self) -> Result<Box<dyn LocalMedia>>;
}

/// Acquired local audio/video tracks
#[async_trait]
pub trait LocalMedia: Send + Sync {
    fn set_audio_enabled(&self, enabled: bool);

    fn set_video_enabled(&self, enabled: bool);

    /// Stop all tracks and free the devices
    async fn release(&self);
}

/// Speech-to-text engine
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Begin recognition; results and failures go to `sink`
    async fn start(&self, sink: RecognitionSink) -> Result<RecognitionHandle>;

    /// Stop a running recognition; returns once the engine has settled
    async fn stop(&self, handle: RecognitionHandle);
}

/// Opaque id of one recognizer run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecognitionHandle(pub u64);

/// Where a recognizer reports transcripts
///
/// Each run gets its own sink. Once the session stops or replaces the run,
/// reports from its sink are dropped.
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    run: u64,
    current: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl RecognitionSink {
    pub(crate) fn new(
        run: u64,
        current: Arc<AtomicU64>,
        tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self { run, current, tx }
    }

    /// Interim or final transcript of the local speaker
    pub fn transcript(&self, text: impl Into<String>, is_final: bool) {
        self.post(SessionEvent::Transcript {
            text: text.into(),
            is_final,
        });
    }

    /// Engine failed; captioning is disabled for the session
    pub fn failed(&self, reason: impl Into<String>) {
        self.post(SessionEvent::RecognitionFailed(
            crate::error::ClientError::Recognition(reason.into()),
        ));
    }

    /// Engine ended on its own, e.g. after a silence timeout
    ///
    /// The session restarts recognition if the microphone is still on.
    pub fn ended(&self) {
        self.post(SessionEvent::RecognitionStopped);
    }

    fn post(&self, event: SessionEvent) {
        if self.current.load(Ordering::SeqCst) != self.run {
            debug!("Dropping report from finished recognition run: {:?}", event);
            return;
        }
        let _ = self.tx.send(event);
    }
}

/// Factory for peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a peer connection toward `peer`
    ///
    /// The link reports gathered candidates and connection changes through
    /// `events`.
    async fn open(
        &self,
        peer: SessionId,
        initiator: bool,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerLink>>;
}

/// One peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create and apply the local offer; returns its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Apply a remote offer and create the local answer; returns its SDP
    async fn accept_offer(&self, sdp: String) -> Result<String>;

    async fn accept_answer(&self, sdp: String) -> Result<()>;

    /// Add a remote ICE candidate (JSON-encoded)
    async fn add_candidate(&self, candidate: String) -> Result<()>;

    async fn close(&self);
}

/// Callbacks from a peer link back into its session
///
/// Each link gets its own generation. Once the session replaces or closes
/// the link, callbacks from the old one are dropped.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    peer: SessionId,
    generation: u64,
    current: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl PeerEvents {
    pub(crate) fn new(
        peer: SessionId,
        generation: u64,
        current: Arc<AtomicU64>,
        tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            peer,
            generation,
            current,
            tx,
        }
    }

    pub fn peer_id(&self) -> &SessionId {
        &self.peer
    }

    /// ICE candidate gathered locally (JSON-encoded)
    pub fn local_candidate(&self, payload: String) {
        self.post(SessionEvent::LocalCandidate {
            peer: self.peer.clone(),
            payload,
        });
    }

    /// Media path is up
    pub fn established(&self) {
        self.post(SessionEvent::ConnectionEstablished {
            peer: self.peer.clone(),
        });
    }

    /// Connection failed or was closed by the remote side
    pub fn closed(&self) {
        self.post(SessionEvent::ConnectionClosed {
            peer: self.peer.clone(),
        });
    }

    fn post(&self, event: SessionEvent) {
        if self.current.load(Ordering::SeqCst) != self.generation {
            debug!("Dropping event from retired link: {:?}", event);
            return;
        }
        let _ = self.tx.send(event);
    }
}

/// Outbound half of the signaling connection
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, call: ClientCall) -> Result<()>;

    /// Close the connection
    async fn close(&self);
}

/// Build the `signal` call for one outgoing envelope
pub(crate) fn signal_call(to: SessionId, kind: SignalKind, payload: String) -> ClientCall {
    ClientCall::Signal(captionroom_protocol::SignalParams {
        target_id: to,
        kind,
        payload,
    })
}
