use super::{Effect, SessionEvent};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::recognition::{RecognitionCommand, RecognitionGate};
use captionroom_protocol::{ConnectionState, Role, RoomId, SessionId, SignalKind};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaStatus {
    Absent,
    Acquiring,
    Held,
    Failed,
    Released,
}

/// Progress of the offer/answer exchange with the current peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Initiator waiting for its peer connection to produce the offer
    CreatingOffer,
    /// Initiator sent the offer
    AwaitingAnswer,
    /// Responder waiting for the offer
    AwaitingOffer,
    /// Responder applied the offer, waiting for its answer
    CreatingAnswer,
    /// Both descriptions applied, waiting for the media path
    AwaitingConnection,
    Established,
}

impl Stage {
    /// Whether the remote description has been handed to the peer connection
    fn has_remote_description(self) -> bool {
        matches!(
            self,
            Stage::CreatingAnswer | Stage::AwaitingConnection | Stage::Established
        )
    }
}

#[derive(Debug, Clone)]
struct PeerSlot {
    id: SessionId,
    role: Role,
    stage: Stage,
    attempt: u32,
    /// Last remote offer or answer applied, for duplicate detection
    remote_description: Option<String>,
    /// Candidates that arrived before the remote description
    early_candidates: Vec<String>,
}

/// Read-only snapshot for the UI
///
/// `connection_state` is `Idle` both before the session starts and while
/// it holds media without a peer. [`awaiting_peer`](Self::awaiting_peer)
/// tells the two apart.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub room_id: RoomId,
    /// Server-assigned id, once the join is accepted
    pub session_id: Option<SessionId>,
    pub connection_state: ConnectionState,
    /// Local camera and microphone are held
    pub media_ready: bool,
    pub role: Role,
    pub peer_id: Option<SessionId>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    /// False once the recognizer has failed
    pub captioning_available: bool,
    pub local_caption: Option<String>,
    pub local_caption_final: bool,
    /// Latest caption per remote sender
    pub remote_captions: BTreeMap<SessionId, String>,
    pub error: Option<ClientError>,
}

impl SessionView {
    /// In the room with media, waiting for the server to assign a peer
    pub fn awaiting_peer(&self) -> bool {
        self.media_ready
            && self.peer_id.is_none()
            && matches!(
                self.connection_state,
                ConnectionState::Idle | ConnectionState::Closed
            )
    }
}

/// State of one client session
#[derive(Debug, Clone)]
pub struct SessionState {
    room_id: RoomId,
    session_id: Option<SessionId>,
    connection: ConnectionState,
    media: MediaStatus,
    in_room: bool,
    peer: Option<PeerSlot>,
    audio_enabled: bool,
    video_enabled: bool,
    recognition: RecognitionGate,
    recognition_error: Option<ClientError>,
    local_caption: Option<String>,
    local_caption_final: bool,
    remote_captions: BTreeMap<SessionId, String>,
    /// Peer events that arrived while media was still being acquired
    pending: Vec<SessionEvent>,
    error: Option<ClientError>,
    finished: bool,
    negotiation_timeout: Duration,
    max_negotiation_attempts: u32,
}

impl SessionState {
    pub fn new(room_id: RoomId, config: &ClientConfig) -> Self {
        Self {
            room_id,
            session_id: None,
            connection: ConnectionState::Idle,
            media: MediaStatus::Absent,
            in_room: false,
            peer: None,
            audio_enabled: !config.start_muted,
            video_enabled: !config.start_video_disabled,
            recognition: RecognitionGate::new(config.recognition_debounce()),
            recognition_error: None,
            local_caption: None,
            local_caption_final: false,
            remote_captions: BTreeMap::new(),
            pending: Vec::new(),
            error: None,
            finished: false,
            negotiation_timeout: config.negotiation_timeout(),
            max_negotiation_attempts: config.max_negotiation_attempts.max(1),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn role(&self) -> Role {
        self.peer.as_ref().map_or(Role::Unassigned, |slot| slot.role)
    }

    pub fn peer_id(&self) -> Option<&SessionId> {
        self.peer.as_ref().map(|slot| &slot.id)
    }

    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }

    pub fn local_caption(&self) -> Option<&str> {
        self.local_caption.as_deref()
    }

    pub fn remote_caption(&self, from: &SessionId) -> Option<&str> {
        self.remote_captions.get(from).map(String::as_str)
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    /// Session left, was rejected, or lost signaling; no further events apply
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            room_id: self.room_id.clone(),
            session_id: self.session_id.clone(),
            connection_state: self.connection,
            media_ready: self.media == MediaStatus::Held,
            role: self.role(),
            peer_id: self.peer_id().cloned(),
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
            captioning_available: self.recognition_error.is_none(),
            local_caption: self.local_caption.clone(),
            local_caption_final: self.local_caption_final,
            remote_captions: self.remote_captions.clone(),
            error: self.error.clone(),
        }
    }

    /// Apply one event and return the effects to execute, in order
    pub fn apply(&mut self, event: SessionEvent, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.finished {
            debug!("Session already finished, ignoring {:?}", event);
            return effects;
        }

        match event {
            SessionEvent::Start => self.on_start(&mut effects),
            SessionEvent::MediaReady => self.on_media_ready(&mut effects, now),
            SessionEvent::MediaFailed(error) => {
                if self.media == MediaStatus::Acquiring {
                    warn!("Media acquisition failed: {}", error);
                    self.media = MediaStatus::Failed;
                    self.connection = ConnectionState::Errored;
                    self.error = Some(error);
                    self.pending.clear();
                }
            }

            SessionEvent::Joined { session_id } => {
                info!("Joined room {} as {}", self.room_id, session_id);
                self.session_id = Some(session_id);
            }
            SessionEvent::RequestFailed(error) => {
                if self.in_room && self.session_id.is_none() {
                    warn!("Join rejected: {}", error);
                    self.in_room = false;
                    self.finish(&mut effects, ConnectionState::Errored, Some(error));
                } else {
                    warn!("Server rejected request: {}", error);
                }
            }
            SessionEvent::SignalingClosed => {
                warn!("Signaling connection closed");
                self.in_room = false;
                self.finish(
                    &mut effects,
                    ConnectionState::Errored,
                    Some(ClientError::Transport(
                        "signaling connection closed".to_string(),
                    )),
                );
            }

            SessionEvent::PeerAssigned { peer, role } => {
                if self.buffer_until_media(SessionEvent::PeerAssigned {
                    peer: peer.clone(),
                    role,
                }) {
                    return effects;
                }
                self.on_peer_assigned(&mut effects, peer, role);
            }
            SessionEvent::SignalReceived {
                from,
                kind,
                payload,
            } => {
                if self.buffer_until_media(SessionEvent::SignalReceived {
                    from: from.clone(),
                    kind,
                    payload: payload.clone(),
                }) {
                    return effects;
                }
                self.on_signal(&mut effects, from, kind, payload);
            }
            SessionEvent::CaptionReceived { from, text } => {
                self.remote_captions.insert(from, text);
            }
            SessionEvent::PeerLeft { peer } => {
                self.remote_captions.remove(&peer);
                self.pending.retain(|event| !concerns_peer(event, &peer));
                if self.is_current_peer(&peer) {
                    info!("Peer {} left the room", peer);
                    self.release_peer(&mut effects, ConnectionState::Closed);
                }
            }

            SessionEvent::LocalDescription {
                peer,
                kind,
                payload,
            } => self.on_local_description(&mut effects, peer, kind, payload),
            SessionEvent::LocalCandidate { peer, payload } => {
                if self.is_current_peer(&peer) {
                    effects.push(Effect::SendSignal {
                        to: peer,
                        kind: SignalKind::Candidate,
                        payload,
                    });
                }
            }
            SessionEvent::NegotiationFailed { peer, error } => {
                if self.is_current_peer(&peer) {
                    self.abort_negotiation(&mut effects, error);
                }
            }
            SessionEvent::ConnectionEstablished { peer } => {
                if let Some(slot) = self.peer.as_mut().filter(|slot| slot.id == peer) {
                    if slot.stage != Stage::Established {
                        info!("Connected to {}", peer);
                        slot.stage = Stage::Established;
                        self.connection = ConnectionState::Connected;
                        self.error = None;
                    }
                }
            }
            SessionEvent::ConnectionClosed { peer } => {
                if self.is_current_peer(&peer) {
                    info!("Peer connection to {} closed", peer);
                    self.release_peer(&mut effects, ConnectionState::Closed);
                }
            }
            SessionEvent::NegotiationTimedOut { peer, attempt } => {
                self.on_negotiation_timeout(&mut effects, peer, attempt)
            }

            SessionEvent::Transcript { text, is_final } => {
                self.on_transcript(&mut effects, text, is_final)
            }
            SessionEvent::RecognitionFailed(error) => {
                warn!("Captioning disabled: {}", error);
                self.recognition.failed();
                self.recognition_error = Some(error);
            }
            SessionEvent::RecognitionStopped => {
                let command = self.recognition.stopped(now);
                push_recognition(&mut effects, command);
            }
            SessionEvent::RecognitionRestartDue { token } => {
                let command = self.recognition.restart_due(token, now);
                push_recognition(&mut effects, command);
            }

            SessionEvent::ToggleMic => {
                self.audio_enabled = !self.audio_enabled;
                if self.media == MediaStatus::Held {
                    effects.push(Effect::SetAudioEnabled(self.audio_enabled));
                    let command = if self.audio_enabled {
                        self.recognition.request_start(now)
                    } else {
                        self.recognition.request_stop(now)
                    };
                    push_recognition(&mut effects, command);
                }
            }
            SessionEvent::ToggleVideo => {
                self.video_enabled = !self.video_enabled;
                if self.media == MediaStatus::Held {
                    effects.push(Effect::SetVideoEnabled(self.video_enabled));
                }
            }
            SessionEvent::Leave => {
                info!("Leaving room {}", self.room_id);
                self.finish(&mut effects, ConnectionState::Closed, None);
            }
        }

        effects
    }

    fn on_start(&mut self, effects: &mut Vec<Effect>) {
        if self.media != MediaStatus::Absent {
            debug!("Session already started");
            return;
        }
        self.media = MediaStatus::Acquiring;
        self.connection = ConnectionState::AcquiringMedia;
        effects.push(Effect::AcquireMedia);
    }

    fn on_media_ready(&mut self, effects: &mut Vec<Effect>, now: Instant) {
        if self.media != MediaStatus::Acquiring {
            debug!("Unexpected media ready in {:?}", self.media);
            return;
        }

        self.media = MediaStatus::Held;
        // Idle again until a peer is assigned; the view reports media_ready
        self.connection = ConnectionState::Idle;
        self.in_room = true;
        effects.push(Effect::SetAudioEnabled(self.audio_enabled));
        effects.push(Effect::SetVideoEnabled(self.video_enabled));
        effects.push(Effect::JoinRoom(self.room_id.clone()));

        if self.audio_enabled {
            let command = self.recognition.request_start(now);
            push_recognition(effects, command);
        }

        for event in std::mem::take(&mut self.pending) {
            effects.extend(self.apply(event, now));
        }
    }

    /// Queue a peer event that arrived before media; true if it was queued
    fn buffer_until_media(&mut self, event: SessionEvent) -> bool {
        match self.media {
            MediaStatus::Absent | MediaStatus::Acquiring => {
                debug!("Buffering {:?} until media is ready", event);
                self.pending.push(event);
                true
            }
            MediaStatus::Held => false,
            MediaStatus::Failed | MediaStatus::Released => {
                debug!("No media, ignoring {:?}", event);
                true
            }
        }
    }

    fn on_peer_assigned(&mut self, effects: &mut Vec<Effect>, peer: SessionId, role: Role) {
        if role == Role::Unassigned {
            return;
        }

        if let Some(slot) = &self.peer {
            if slot.id == peer {
                debug!("Duplicate assignment for {}, ignoring", peer);
                return;
            }
            info!("Replacing peer {} with {}", slot.id, peer);
            effects.push(Effect::ClosePeer {
                peer: slot.id.clone(),
            });
            self.peer = None;
        }

        self.open_peer(effects, peer, role, 1);
    }

    fn open_peer(&mut self, effects: &mut Vec<Effect>, peer: SessionId, role: Role, attempt: u32) {
        let initiator = role == Role::Initiator;
        info!(
            "Negotiating with {} as {:?} (attempt {})",
            peer, role, attempt
        );

        self.peer = Some(PeerSlot {
            id: peer.clone(),
            role,
            stage: if initiator {
                Stage::CreatingOffer
            } else {
                Stage::AwaitingOffer
            },
            attempt,
            remote_description: None,
            early_candidates: Vec::new(),
        });
        self.connection = ConnectionState::Negotiating;
        self.error = None;

        effects.push(Effect::OpenPeer {
            peer: peer.clone(),
            initiator,
        });
        effects.push(Effect::ArmNegotiationTimer {
            peer,
            attempt,
            after: self.negotiation_timeout,
        });
    }

    fn on_signal(
        &mut self,
        effects: &mut Vec<Effect>,
        from: SessionId,
        kind: SignalKind,
        payload: String,
    ) {
        match &self.peer {
            Some(slot) if slot.id == from => {}
            Some(slot) => {
                debug!(
                    "Stale {} from {} while paired with {}, ignoring",
                    kind, from, slot.id
                );
                return;
            }
            None if kind == SignalKind::Offer => {
                // Offer from a peer we were never told about; adopt it as
                // a responder assignment
                info!("Adopting late offer from {}", from);
                self.open_peer(effects, from.clone(), Role::Responder, 1);
            }
            None => {
                debug!("Stale {} from {} while unpaired, ignoring", kind, from);
                return;
            }
        }

        match kind {
            SignalKind::Offer => self.on_remote_offer(effects, payload),
            SignalKind::Answer => self.on_remote_answer(effects, payload),
            SignalKind::Candidate => self.on_remote_candidate(effects, payload),
        }
    }

    fn on_remote_offer(&mut self, effects: &mut Vec<Effect>, payload: String) {
        let Some(slot) = self.peer.as_mut() else {
            return;
        };

        if slot.role != Role::Responder {
            if slot.stage == Stage::Established {
                debug!("Stale offer from {} after connect, ignoring", slot.id);
            } else {
                self.abort_negotiation(
                    effects,
                    ClientError::Signaling("offer received while initiating".to_string()),
                );
            }
            return;
        }

        match slot.stage {
            Stage::AwaitingOffer => {}
            Stage::Established => {
                debug!("Stale offer from {} after connect, ignoring", slot.id);
                return;
            }
            _ if slot.remote_description.as_deref() == Some(payload.as_str()) => {
                debug!("Duplicate offer from {}, ignoring", slot.id);
                return;
            }
            _ => {
                // Initiator restarted its attempt; start over on a fresh
                // peer connection
                let peer = slot.id.clone();
                let attempt = slot.attempt + 1;
                info!("New offer from {}, restarting negotiation", peer);
                effects.push(Effect::ClosePeer { peer: peer.clone() });
                self.open_peer(effects, peer, Role::Responder, attempt);
            }
        }

        if let Some(slot) = self.peer.as_mut() {
            slot.stage = Stage::CreatingAnswer;
            slot.remote_description = Some(payload.clone());
            effects.push(Effect::ApplyRemote {
                peer: slot.id.clone(),
                kind: SignalKind::Offer,
                payload,
            });
            flush_early_candidates(effects, slot);
        }
    }

    fn on_remote_answer(&mut self, effects: &mut Vec<Effect>, payload: String) {
        let Some(slot) = self.peer.as_mut() else {
            return;
        };

        match (slot.role, slot.stage) {
            (Role::Initiator, Stage::AwaitingAnswer) => {
                slot.stage = Stage::AwaitingConnection;
                slot.remote_description = Some(payload.clone());
                effects.push(Effect::ApplyRemote {
                    peer: slot.id.clone(),
                    kind: SignalKind::Answer,
                    payload,
                });
                flush_early_candidates(effects, slot);
            }
            (_, Stage::Established) => {
                debug!("Stale answer from {} after connect, ignoring", slot.id);
            }
            (Role::Initiator, Stage::AwaitingConnection)
                if slot.remote_description.as_deref() == Some(payload.as_str()) =>
            {
                debug!("Duplicate answer from {}, ignoring", slot.id);
            }
            _ => {
                self.abort_negotiation(
                    effects,
                    ClientError::Signaling("answer without an outstanding offer".to_string()),
                );
            }
        }
    }

    fn on_remote_candidate(&mut self, effects: &mut Vec<Effect>, payload: String) {
        let Some(slot) = self.peer.as_mut() else {
            return;
        };

        if slot.stage.has_remote_description() {
            effects.push(Effect::ApplyRemote {
                peer: slot.id.clone(),
                kind: SignalKind::Candidate,
                payload,
            });
        } else {
            slot.early_candidates.push(payload);
        }
    }

    fn on_local_description(
        &mut self,
        effects: &mut Vec<Effect>,
        peer: SessionId,
        kind: SignalKind,
        payload: String,
    ) {
        let Some(slot) = self.peer.as_mut().filter(|slot| slot.id == peer) else {
            debug!("Local {} for stale peer {}, ignoring", kind, peer);
            return;
        };

        let next = match (kind, slot.stage) {
            (SignalKind::Offer, Stage::CreatingOffer) => Stage::AwaitingAnswer,
            (SignalKind::Answer, Stage::CreatingAnswer) => Stage::AwaitingConnection,
            _ => {
                debug!("Unexpected local {} in {:?}, ignoring", kind, slot.stage);
                return;
            }
        };

        slot.stage = next;
        effects.push(Effect::SendSignal {
            to: peer,
            kind,
            payload,
        });
    }

    fn on_negotiation_timeout(&mut self, effects: &mut Vec<Effect>, peer: SessionId, attempt: u32) {
        let Some(slot) = self
            .peer
            .as_ref()
            .filter(|slot| slot.id == peer && slot.attempt == attempt)
        else {
            return;
        };
        if slot.stage == Stage::Established {
            return;
        }

        let role = slot.role;
        warn!(
            "Negotiation with {} timed out (attempt {}/{})",
            peer, attempt, self.max_negotiation_attempts
        );
        effects.push(Effect::ClosePeer { peer: peer.clone() });
        self.peer = None;

        if attempt < self.max_negotiation_attempts {
            // Initiator sends a fresh offer; responder waits for one
            self.open_peer(effects, peer, role, attempt + 1);
        } else {
            self.connection = ConnectionState::Errored;
            self.error = Some(ClientError::NegotiationTimeout { attempts: attempt });
        }
    }

    fn on_transcript(&mut self, effects: &mut Vec<Effect>, text: String, is_final: bool) {
        if !self.recognition.is_running() {
            debug!("Transcript while recognition is off, ignoring");
            return;
        }
        if text.trim().is_empty() {
            return;
        }

        self.local_caption = Some(text.clone());
        self.local_caption_final = is_final;

        if self.in_room {
            effects.push(Effect::SendCaption {
                room_id: self.room_id.clone(),
                text,
            });
        }
    }

    fn is_current_peer(&self, peer: &SessionId) -> bool {
        self.peer.as_ref().is_some_and(|slot| &slot.id == peer)
    }

    /// Drop the current attempt after a signaling or negotiation failure
    ///
    /// Media is still held, so a later assignment can start over.
    fn abort_negotiation(&mut self, effects: &mut Vec<Effect>, error: ClientError) {
        warn!("Negotiation aborted: {}", error);
        self.release_peer(effects, ConnectionState::Errored);
        self.error = Some(error);
    }

    fn release_peer(&mut self, effects: &mut Vec<Effect>, next: ConnectionState) {
        if let Some(slot) = self.peer.take() {
            effects.push(Effect::ClosePeer { peer: slot.id });
        }
        self.connection = next;
    }

    /// Release everything this session holds and stop accepting events
    fn finish(&mut self, effects: &mut Vec<Effect>, next: ConnectionState, error: Option<ClientError>) {
        if let Some(slot) = self.peer.take() {
            effects.push(Effect::ClosePeer { peer: slot.id });
        }
        push_recognition(effects, self.recognition.shutdown());
        if matches!(self.media, MediaStatus::Held | MediaStatus::Acquiring) {
            effects.push(Effect::ReleaseMedia);
            self.media = MediaStatus::Released;
        }
        if self.in_room {
            effects.push(Effect::LeaveRoom);
            self.in_room = false;
        }

        self.pending.clear();
        self.connection = next;
        if error.is_some() {
            self.error = error;
        }
        self.finished = true;
    }
}

fn push_recognition(effects: &mut Vec<Effect>, command: Option<RecognitionCommand>) {
    match command {
        Some(RecognitionCommand::Start) => effects.push(Effect::StartRecognition),
        Some(RecognitionCommand::Stop) => effects.push(Effect::StopRecognition),
        Some(RecognitionCommand::ScheduleRestart { after, token }) => {
            effects.push(Effect::ScheduleRecognitionRestart { after, token })
        }
        None => {}
    }
}

fn flush_early_candidates(effects: &mut Vec<Effect>, slot: &mut PeerSlot) {
    for payload in slot.early_candidates.drain(..) {
        effects.push(Effect::ApplyRemote {
            peer: slot.id.clone(),
            kind: SignalKind::Candidate,
            payload,
        });
    }
}

fn concerns_peer(event: &SessionEvent, peer: &SessionId) -> bool {
    match event {
        SessionEvent::PeerAssigned { peer: p, .. } => p == peer,
        SessionEvent::SignalReceived { from, .. } => from == peer,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::default()
    }

    fn a() -> SessionId {
        SessionId::new("a")
    }

    fn b() -> SessionId {
        SessionId::new("b")
    }

    /// Session with media held and recognition running
    fn ready(now: Instant) -> SessionState {
        let mut state = SessionState::new(RoomId::new("abc"), &config());
        state.apply(SessionEvent::Start, now);
        state.apply(SessionEvent::MediaReady, now);
        state
    }

    fn signal(from: SessionId, kind: SignalKind, payload: &str) -> SessionEvent {
        SessionEvent::SignalReceived {
            from,
            kind,
            payload: payload.to_string(),
        }
    }

    /// Initiator toward B that has sent its offer
    fn initiator_awaiting_answer(now: Instant) -> SessionState {
        let mut state = ready(now);
        state.apply(
            SessionEvent::PeerAssigned {
                peer: b(),
                role: Role::Initiator,
            },
            now,
        );
        state.apply(
            SessionEvent::LocalDescription {
                peer: b(),
                kind: SignalKind::Offer,
                payload: "offer".into(),
            },
            now,
        );
        state
    }

    fn connected_responder(now: Instant) -> SessionState {
        let mut state = ready(now);
        state.apply(
            SessionEvent::PeerAssigned {
                peer: a(),
                role: Role::Responder,
            },
            now,
        );
        state.apply(signal(a(), SignalKind::Offer, "offer"), now);
        state.apply(
            SessionEvent::LocalDescription {
                peer: a(),
                kind: SignalKind::Answer,
                payload: "answer".into(),
            },
            now,
        );
        state.apply(SessionEvent::ConnectionEstablished { peer: a() }, now);
        state
    }

    #[test]
    fn test_start_acquires_media() {
        let mut state = SessionState::new(RoomId::new("abc"), &config());
        let effects = state.apply(SessionEvent::Start, Instant::now());

        assert_eq!(effects, vec![Effect::AcquireMedia]);
        assert_eq!(state.connection_state(), ConnectionState::AcquiringMedia);
    }

    #[test]
    fn test_media_ready_joins_and_starts_recognition() {
        let now = Instant::now();
        let mut state = SessionState::new(RoomId::new("abc"), &config());
        assert!(!state.view().awaiting_peer());
        state.apply(SessionEvent::Start, now);
        let effects = state.apply(SessionEvent::MediaReady, now);

        let view = state.view();
        assert_eq!(view.connection_state, ConnectionState::Idle);
        assert!(view.media_ready);
        assert!(view.awaiting_peer());
        assert_eq!(
            effects,
            vec![
                Effect::SetAudioEnabled(true),
                Effect::SetVideoEnabled(true),
                Effect::JoinRoom(RoomId::new("abc")),
                Effect::StartRecognition,
            ]
        );
        assert_eq!(state.role(), Role::Unassigned);
    }

    #[test]
    fn test_start_muted_skips_recognition() {
        let now = Instant::now();
        let mut cfg = config();
        cfg.start_muted = true;
        let mut state = SessionState::new(RoomId::new("abc"), &cfg);
        state.apply(SessionEvent::Start, now);
        let effects = state.apply(SessionEvent::MediaReady, now);

        assert!(effects.contains(&Effect::SetAudioEnabled(false)));
        assert!(!effects.contains(&Effect::StartRecognition));
    }

    #[test]
    fn test_media_failure_prevents_negotiation() {
        let now = Instant::now();
        let mut state = SessionState::new(RoomId::new("abc"), &config());
        state.apply(SessionEvent::Start, now);
        let effects = state.apply(
            SessionEvent::MediaFailed(ClientError::MediaAcquisition("denied".into())),
            now,
        );
        assert!(effects.is_empty());
        assert_eq!(state.connection_state(), ConnectionState::Errored);

        let effects = state.apply(
            SessionEvent::PeerAssigned {
                peer: b(),
                role: Role::Initiator,
            },
            now,
        );
        assert!(effects.is_empty());
        assert_eq!(state.peer_id(), None);
    }

    #[test]
    fn test_initiator_sends_offer() {
        let now = Instant::now();
        let mut state = ready(now);

        let effects = state.apply(
            SessionEvent::PeerAssigned {
                peer: b(),
                role: Role::Initiator,
            },
            now,
        );
        assert_eq!(
            effects,
            vec![
                Effect::OpenPeer {
                    peer: b(),
                    initiator: true
                },
                Effect::ArmNegotiationTimer {
                    peer: b(),
                    attempt: 1,
                    after: Duration::from_secs(15)
                },
            ]
        );
        assert_eq!(state.connection_state(), ConnectionState::Negotiating);

        let effects = state.apply(
            SessionEvent::LocalDescription {
                peer: b(),
                kind: SignalKind::Offer,
                payload: "offer".into(),
            },
            now,
        );
        assert_eq!(
            effects,
            vec![Effect::SendSignal {
                to: b(),
                kind: SignalKind::Offer,
                payload: "offer".into()
            }]
        );
    }

    #[test]
    fn test_responder_answers_offer() {
        let now = Instant::now();
        let mut state = ready(now);
        state.apply(
            SessionEvent::PeerAssigned {
                peer: a(),
                role: Role::Responder,
            },
            now,
        );

        let effects = state.apply(signal(a(), SignalKind::Offer, "offer"), now);
        assert_eq!(
            effects,
            vec![Effect::ApplyRemote {
                peer: a(),
                kind: SignalKind::Offer,
                payload: "offer".into()
            }]
        );

        let effects = state.apply(
            SessionEvent::LocalDescription {
                peer: a(),
                kind: SignalKind::Answer,
                payload: "answer".into(),
            },
            now,
        );
        assert_eq!(
            effects,
            vec![Effect::SendSignal {
                to: a(),
                kind: SignalKind::Answer,
                payload: "answer".into()
            }]
        );
    }

    #[test]
    fn test_unsolicited_offer_is_adopted() {
        let now = Instant::now();
        let mut state = ready(now);

        let effects = state.apply(signal(a(), SignalKind::Offer, "offer"), now);
        assert_eq!(state.role(), Role::Responder);
        assert_eq!(
            effects.first(),
            Some(&Effect::OpenPeer {
                peer: a(),
                initiator: false
            })
        );
        assert!(effects.contains(&Effect::ApplyRemote {
            peer: a(),
            kind: SignalKind::Offer,
            payload: "offer".into()
        }));
    }

    #[test]
    fn test_duplicate_envelopes_after_connect_are_ignored() {
        let now = Instant::now();
        let mut state = connected_responder(now);
        let before = state.view();

        assert!(state
            .apply(signal(a(), SignalKind::Offer, "offer"), now)
            .is_empty());
        assert!(state
            .apply(
                SessionEvent::PeerAssigned {
                    peer: a(),
                    role: Role::Responder
                },
                now
            )
            .is_empty());

        assert_eq!(state.view(), before);
        assert_eq!(state.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_answer_without_offer_aborts() {
        let now = Instant::now();
        let mut state = ready(now);
        state.apply(
            SessionEvent::PeerAssigned {
                peer: a(),
                role: Role::Responder,
            },
            now,
        );

        let effects = state.apply(signal(a(), SignalKind::Answer, "answer"), now);
        assert_eq!(effects, vec![Effect::ClosePeer { peer: a() }]);
        assert_eq!(state.connection_state(), ConnectionState::Errored);
        assert!(matches!(state.error(), Some(ClientError::Signaling(_))));

        // Media is still held, so a fresh assignment recovers
        let effects = state.apply(
            SessionEvent::PeerAssigned {
                peer: a(),
                role: Role::Initiator,
            },
            now,
        );
        assert!(effects.contains(&Effect::OpenPeer {
            peer: a(),
            initiator: true
        }));
        assert_eq!(state.connection_state(), ConnectionState::Negotiating);
        assert_eq!(state.error(), None);
    }

    #[test]
    fn test_early_candidates_flush_after_offer() {
        let now = Instant::now();
        let mut state = ready(now);
        state.apply(
            SessionEvent::PeerAssigned {
                peer: a(),
                role: Role::Responder,
            },
            now,
        );

        assert!(state
            .apply(signal(a(), SignalKind::Candidate, "c1"), now)
            .is_empty());
        let effects = state.apply(signal(a(), SignalKind::Offer, "offer"), now);

        assert_eq!(
            effects,
            vec![
                Effect::ApplyRemote {
                    peer: a(),
                    kind: SignalKind::Offer,
                    payload: "offer".into()
                },
                Effect::ApplyRemote {
                    peer: a(),
                    kind: SignalKind::Candidate,
                    payload: "c1".into()
                },
            ]
        );
    }

    #[test]
    fn test_peer_left_mid_negotiation_releases_peer() {
        let now = Instant::now();
        let mut state = initiator_awaiting_answer(now);

        let effects = state.apply(SessionEvent::PeerLeft { peer: b() }, now);
        assert_eq!(effects, vec![Effect::ClosePeer { peer: b() }]);
        assert_eq!(state.connection_state(), ConnectionState::Closed);
        assert_eq!(state.role(), Role::Unassigned);
        assert!(!state.is_finished());
        assert!(state.view().awaiting_peer());
    }

    #[test]
    fn test_stale_connection_events_are_ignored() {
        let now = Instant::now();
        let mut state = initiator_awaiting_answer(now);

        assert!(state
            .apply(SessionEvent::ConnectionClosed { peer: a() }, now)
            .is_empty());
        assert!(state
            .apply(signal(a(), SignalKind::Answer, "x"), now)
            .is_empty());
        assert_eq!(state.connection_state(), ConnectionState::Negotiating);
    }

    #[test]
    fn test_initiator_retries_after_timeout() {
        let now = Instant::now();
        let mut state = initiator_awaiting_answer(now);

        let effects = state.apply(
            SessionEvent::NegotiationTimedOut {
                peer: b(),
                attempt: 1,
            },
            now,
        );
        assert_eq!(
            effects,
            vec![
                Effect::ClosePeer { peer: b() },
                Effect::OpenPeer {
                    peer: b(),
                    initiator: true
                },
                Effect::ArmNegotiationTimer {
                    peer: b(),
                    attempt: 2,
                    after: Duration::from_secs(15)
                },
            ]
        );

        // Stale timer from the first attempt does nothing
        assert!(state
            .apply(
                SessionEvent::NegotiationTimedOut {
                    peer: b(),
                    attempt: 1
                },
                now
            )
            .is_empty());

        let effects = state.apply(
            SessionEvent::NegotiationTimedOut {
                peer: b(),
                attempt: 2,
            },
            now,
        );
        assert_eq!(effects, vec![Effect::ClosePeer { peer: b() }]);
        assert_eq!(state.connection_state(), ConnectionState::Errored);
        assert_eq!(
            state.error(),
            Some(&ClientError::NegotiationTimeout { attempts: 2 })
        );
    }

    #[test]
    fn test_timeout_after_connect_is_ignored() {
        let now = Instant::now();
        let mut state = connected_responder(now);
        assert!(state
            .apply(
                SessionEvent::NegotiationTimedOut {
                    peer: a(),
                    attempt: 1
                },
                now
            )
            .is_empty());
        assert_eq!(state.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_responder_accepts_restarted_offer() {
        let now = Instant::now();
        let mut state = ready(now);
        state.apply(
            SessionEvent::PeerAssigned {
                peer: a(),
                role: Role::Responder,
            },
            now,
        );
        state.apply(signal(a(), SignalKind::Offer, "offer-1"), now);

        // Same offer again is a duplicate
        assert!(state
            .apply(signal(a(), SignalKind::Offer, "offer-1"), now)
            .is_empty());

        let effects = state.apply(signal(a(), SignalKind::Offer, "offer-2"), now);
        assert_eq!(effects[0], Effect::ClosePeer { peer: a() });
        assert_eq!(
            effects[1],
            Effect::OpenPeer {
                peer: a(),
                initiator: false
            }
        );
        assert_eq!(
            effects.last(),
            Some(&Effect::ApplyRemote {
                peer: a(),
                kind: SignalKind::Offer,
                payload: "offer-2".into()
            })
        );
    }

    #[test]
    fn test_transcripts_replace_caption() {
        let now = Instant::now();
        let mut state = ready(now);

        let effects = state.apply(
            SessionEvent::Transcript {
                text: "Hello".into(),
                is_final: false,
            },
            now,
        );
        assert_eq!(
            effects,
            vec![Effect::SendCaption {
                room_id: RoomId::new("abc"),
                text: "Hello".into()
            }]
        );

        state.apply(
            SessionEvent::Transcript {
                text: "Hello world".into(),
                is_final: true,
            },
            now,
        );
        assert_eq!(state.local_caption(), Some("Hello world"));
        assert!(state.view().local_caption_final);
    }

    #[test]
    fn test_remote_captions_last_write_wins() {
        let now = Instant::now();
        let mut state = ready(now);

        for text in ["Hello", "Hello world"] {
            state.apply(
                SessionEvent::CaptionReceived {
                    from: b(),
                    text: text.into(),
                },
                now,
            );
        }
        assert_eq!(state.remote_caption(&b()), Some("Hello world"));

        state.apply(SessionEvent::PeerLeft { peer: b() }, now);
        assert_eq!(state.remote_caption(&b()), None);
    }

    #[test]
    fn test_mic_toggle_controls_track_and_recognition() {
        let now = Instant::now();
        let mut state = ready(now);

        let effects = state.apply(SessionEvent::ToggleMic, now);
        assert_eq!(
            effects,
            vec![Effect::SetAudioEnabled(false), Effect::StopRecognition]
        );

        // Transcripts after mute are dropped
        assert!(state
            .apply(
                SessionEvent::Transcript {
                    text: "late".into(),
                    is_final: true
                },
                now
            )
            .is_empty());
    }

    #[test]
    fn test_video_toggle_never_touches_peer() {
        let now = Instant::now();
        let mut state = connected_responder(now);

        let effects = state.apply(SessionEvent::ToggleVideo, now);
        assert_eq!(effects, vec![Effect::SetVideoEnabled(false)]);
        assert_eq!(state.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_recognition_failure_keeps_call() {
        let now = Instant::now();
        let mut state = connected_responder(now);

        state.apply(
            SessionEvent::RecognitionFailed(ClientError::Recognition("unsupported".into())),
            now,
        );
        assert_eq!(state.connection_state(), ConnectionState::Connected);
        assert!(!state.view().captioning_available);
        assert!(state.apply(SessionEvent::ToggleMic, now) == vec![Effect::SetAudioEnabled(false)]);
    }

    #[test]
    fn test_leave_releases_everything() {
        let now = Instant::now();
        let mut state = connected_responder(now);

        let effects = state.apply(SessionEvent::Leave, now);
        assert_eq!(
            effects,
            vec![
                Effect::ClosePeer { peer: a() },
                Effect::StopRecognition,
                Effect::ReleaseMedia,
                Effect::LeaveRoom,
            ]
        );
        assert_eq!(state.connection_state(), ConnectionState::Closed);
        assert!(state.is_finished());
        assert!(!state.view().awaiting_peer());

        assert!(state.apply(SessionEvent::Leave, now).is_empty());
        assert!(state
            .apply(signal(a(), SignalKind::Offer, "offer"), now)
            .is_empty());
    }

    #[test]
    fn test_join_rejected_releases_media_without_leave() {
        let now = Instant::now();
        let mut state = ready(now);

        let effects = state.apply(
            SessionEvent::RequestFailed(ClientError::RoomFull("abc".into())),
            now,
        );
        assert_eq!(effects, vec![Effect::StopRecognition, Effect::ReleaseMedia]);
        assert_eq!(state.connection_state(), ConnectionState::Errored);
        assert!(state.is_finished());
    }

    #[test]
    fn test_any_join_error_ends_session() {
        let now = Instant::now();
        let mut state = ready(now);

        let error = ClientError::Signaling("Remote error -32602: Invalid params".into());
        state.apply(SessionEvent::RequestFailed(error.clone()), now);

        assert_eq!(state.connection_state(), ConnectionState::Errored);
        assert_eq!(state.error(), Some(&error));
        assert!(state.is_finished());
    }

    #[test]
    fn test_request_error_after_join_is_logged_only() {
        let now = Instant::now();
        let mut state = connected_responder(now);
        state.apply(
            SessionEvent::Joined {
                session_id: b(),
            },
            now,
        );

        let effects = state.apply(
            SessionEvent::RequestFailed(ClientError::Signaling("payload too large".into())),
            now,
        );
        assert!(effects.is_empty());
        assert_eq!(state.connection_state(), ConnectionState::Connected);
        assert!(!state.is_finished());
    }

    #[test]
    fn test_events_before_media_are_replayed() {
        let now = Instant::now();
        let mut state = SessionState::new(RoomId::new("abc"), &config());
        state.apply(SessionEvent::Start, now);

        assert!(state
            .apply(
                SessionEvent::PeerAssigned {
                    peer: a(),
                    role: Role::Responder
                },
                now
            )
            .is_empty());
        assert!(state
            .apply(signal(a(), SignalKind::Offer, "offer"), now)
            .is_empty());

        let effects = state.apply(SessionEvent::MediaReady, now);
        assert!(effects.contains(&Effect::OpenPeer {
            peer: a(),
            initiator: false
        }));
        assert!(effects.contains(&Effect::ApplyRemote {
            peer: a(),
            kind: SignalKind::Offer,
            payload: "offer".into()
        }));
    }
}
