//! Session runtime
//!
//! One tokio task per session owns the [`SessionState`] and every resource
//! the state machine controls. Events from the user, the signaling server,
//! the peer link, the recognizer and timers all go through a single inbox,
//! so the state machine never runs concurrently with itself. Effects from
//! one event run in order before the next event is taken; events an effect
//! produces directly (an offer, a media result) jump ahead of the inbox.

use crate::collaborators::{
    signal_call, LocalMedia, MediaDevices, PeerConnector, PeerEvents, PeerLink,
    RecognitionHandle, RecognitionSink, Recognizer, SignalingTransport,
};
use crate::config::ClientConfig;
use crate::controller::{Effect, SessionEvent, SessionState, SessionView};
use crate::error::{ClientError, Result};
use captionroom_protocol::{
    CaptionParams, ClientCall, JoinParams, JoinResult, LeaveParams, RoomId,
    ServerFrame, SessionId, SignalKind,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Collaborators a session runs against
#[derive(Clone)]
pub struct SessionDeps {
    pub media: Arc<dyn MediaDevices>,
    pub recognizer: Arc<dyn Recognizer>,
    pub connector: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn SignalingTransport>,
}

/// Handle to a running session
///
/// Dropping the handle leaves the room.
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
    view: watch::Receiver<SessionView>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Post an event to the session; false once the session has ended
    pub fn send(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn toggle_mic(&self) -> bool {
        self.send(SessionEvent::ToggleMic)
    }

    pub fn toggle_video(&self) -> bool {
        self.send(SessionEvent::ToggleVideo)
    }

    pub fn leave(&self) -> bool {
        self.send(SessionEvent::Leave)
    }

    /// Subscribe to view updates
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Latest view
    pub fn current(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Wait until the view satisfies `predicate`
    pub async fn wait_for(&self, predicate: impl FnMut(&SessionView) -> bool) -> Result<SessionView> {
        let mut view = self.view.clone();
        let result = view.wait_for(predicate).await;
        result
            .map(|view| view.clone())
            .map_err(|_| ClientError::Transport("session ended".to_string()))
    }

    /// Wait for the session task to finish
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session task failed: {}", e);
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(SessionEvent::Leave);
    }
}

/// Start a session for `room_id`
///
/// `inbound` carries every frame the signaling transport receives. Fails
/// without spawning anything if `config` does not validate.
pub fn spawn_session(
    config: &ClientConfig,
    room_id: RoomId,
    deps: SessionDeps,
    inbound: mpsc::UnboundedReceiver<ServerFrame>,
) -> Result<SessionHandle> {
    config.validate()?;

    let (tx, rx) = mpsc::unbounded_channel();
    let state = SessionState::new(room_id.clone(), config);
    let (view_tx, view) = watch::channel(state.view());

    let forwarder = tokio::spawn(forward_frames(inbound, tx.clone()));

    let runner = SessionRunner {
        state,
        deps,
        tx: tx.clone(),
        view_tx,
        media: None,
        link: None,
        link_generation: Arc::new(AtomicU64::new(0)),
        recognition: None,
        recognition_run: Arc::new(AtomicU64::new(0)),
        timers: Vec::new(),
        forwarder,
    };

    let span = info_span!("session", room = %room_id);
    let task = tokio::spawn(runner.run(rx).instrument(span));

    Ok(SessionHandle {
        tx,
        view,
        task: Some(task),
    })
}

/// Translate server frames into session events
async fn forward_frames(
    mut inbound: mpsc::UnboundedReceiver<ServerFrame>,
    tx: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(frame) = inbound.recv().await {
        let event = match frame {
            ServerFrame::Event(event) => SessionEvent::from(event),
            ServerFrame::Response(response) => {
                match serde_json::from_value::<JoinResult>(response.result) {
                    Ok(joined) => SessionEvent::Joined {
                        session_id: joined.session_id,
                    },
                    // Acks for signal, caption and leave
                    Err(_) => continue,
                }
            }
            ServerFrame::Error(error) => {
                debug!("Request {} failed with code {}", error.id, error.error.code);
                let remote = captionroom_protocol::Error::from(error);
                SessionEvent::RequestFailed(ClientError::from(remote))
            }
        };

        if tx.send(event).is_err() {
            return;
        }
    }

    let _ = tx.send(SessionEvent::SignalingClosed);
}

struct ActiveLink {
    peer: SessionId,
    link: Box<dyn PeerLink>,
}

struct SessionRunner {
    state: SessionState,
    deps: SessionDeps,
    tx: mpsc::UnboundedSender<SessionEvent>,
    view_tx: watch::Sender<SessionView>,
    media: Option<Box<dyn LocalMedia>>,
    link: Option<ActiveLink>,
    /// Generation of the current link; callbacks from older links are dropped
    link_generation: Arc<AtomicU64>,
    recognition: Option<RecognitionHandle>,
    /// Id of the current recognizer run; reports from older runs are dropped
    recognition_run: Arc<AtomicU64>,
    timers: Vec<JoinHandle<()>>,
    forwarder: JoinHandle<()>,
}

impl SessionRunner {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SessionEvent>) {
        info!("Session started");
        let mut follow_ups = VecDeque::from([SessionEvent::Start]);

        loop {
            let event = match follow_ups.pop_front() {
                Some(event) => event,
                None => match inbox.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };

            let effects = self.state.apply(event, Instant::now());
            for effect in effects {
                if let Some(event) = self.execute(effect).await {
                    follow_ups.push_back(event);
                }
            }

            self.view_tx.send_replace(self.state.view());
            if self.state.is_finished() {
                break;
            }
        }

        self.shutdown().await;
        info!("Session ended: {:?}", self.state.connection_state());
    }

    /// Carry out one effect; returns an event it produced directly
    async fn execute(&mut self, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::AcquireMedia => match self.deps.media.acquire().await {
                Ok(media) => {
                    self.media = Some(media);
                    Some(SessionEvent::MediaReady)
                }
                Err(e) => Some(SessionEvent::MediaFailed(e)),
            },
            Effect::ReleaseMedia => {
                if let Some(media) = self.media.take() {
                    media.release().await;
                }
                None
            }
            Effect::SetAudioEnabled(enabled) => {
                if let Some(media) = &self.media {
                    media.set_audio_enabled(enabled);
                }
                None
            }
            Effect::SetVideoEnabled(enabled) => {
                if let Some(media) = &self.media {
                    media.set_video_enabled(enabled);
                }
                None
            }

            Effect::JoinRoom(room_id) => {
                self.send_call(ClientCall::Join(JoinParams { room_id })).await;
                None
            }
            Effect::LeaveRoom => {
                self.send_call(ClientCall::Leave(LeaveParams::default()))
                    .await;
                None
            }

            Effect::OpenPeer { peer, initiator } => self.open_peer(peer, initiator).await,
            Effect::ApplyRemote {
                peer,
                kind,
                payload,
            } => self.apply_remote(peer, kind, payload).await,
            Effect::ClosePeer { peer } => {
                if self.link.as_ref().is_some_and(|active| active.peer == peer) {
                    self.close_link().await;
                }
                None
            }
            Effect::SendSignal { to, kind, payload } => {
                self.send_call(signal_call(to, kind, payload)).await;
                None
            }
            Effect::ArmNegotiationTimer {
                peer,
                attempt,
                after,
            } => {
                self.schedule(after, SessionEvent::NegotiationTimedOut { peer, attempt });
                None
            }

            Effect::StartRecognition => {
                let run = self.recognition_run.fetch_add(1, Ordering::SeqCst) + 1;
                let sink =
                    RecognitionSink::new(run, self.recognition_run.clone(), self.tx.clone());
                match self.deps.recognizer.start(sink).await {
                    Ok(handle) => {
                        self.recognition = Some(handle);
                        None
                    }
                    Err(e) => Some(SessionEvent::RecognitionFailed(e)),
                }
            }
            Effect::StopRecognition => {
                // Retire the run first; this arm reports the stop itself
                self.recognition_run.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = self.recognition.take() {
                    self.deps.recognizer.stop(handle).await;
                }
                Some(SessionEvent::RecognitionStopped)
            }
            Effect::ScheduleRecognitionRestart { after, token } => {
                self.schedule(after, SessionEvent::RecognitionRestartDue { token });
                None
            }
            Effect::SendCaption { room_id, text } => {
                self.send_call(ClientCall::Caption(CaptionParams { room_id, text }))
                    .await;
                None
            }
        }
    }

    async fn open_peer(&mut self, peer: SessionId, initiator: bool) -> Option<SessionEvent> {
        if self.link.is_some() {
            self.close_link().await;
        }

        let generation = self.link_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let events = PeerEvents::new(
            peer.clone(),
            generation,
            self.link_generation.clone(),
            self.tx.clone(),
        );

        let link = match self.deps.connector.open(peer.clone(), initiator, events).await {
            Ok(link) => link,
            Err(error) => return Some(SessionEvent::NegotiationFailed { peer, error }),
        };

        let offer = if initiator {
            Some(link.create_offer().await)
        } else {
            None
        };
        self.link = Some(ActiveLink {
            peer: peer.clone(),
            link,
        });

        match offer {
            Some(Ok(payload)) => Some(SessionEvent::LocalDescription {
                peer,
                kind: SignalKind::Offer,
                payload,
            }),
            Some(Err(error)) => Some(SessionEvent::NegotiationFailed { peer, error }),
            None => None,
        }
    }

    async fn apply_remote(
        &mut self,
        peer: SessionId,
        kind: SignalKind,
        payload: String,
    ) -> Option<SessionEvent> {
        let Some(active) = self.link.as_ref().filter(|active| active.peer == peer) else {
            debug!("No link for {}, dropping remote {}", peer, kind);
            return None;
        };

        let result = match kind {
            SignalKind::Offer => active.link.accept_offer(payload).await.map(Some),
            SignalKind::Answer => active.link.accept_answer(payload).await.map(|_| None),
            SignalKind::Candidate => active.link.add_candidate(payload).await.map(|_| None),
        };

        match result {
            Ok(Some(answer)) => Some(SessionEvent::LocalDescription {
                peer,
                kind: SignalKind::Answer,
                payload: answer,
            }),
            Ok(None) => None,
            Err(error) => Some(SessionEvent::NegotiationFailed { peer, error }),
        }
    }

    async fn close_link(&mut self) {
        if let Some(active) = self.link.take() {
            // Retire the generation first so the close callback is dropped
            self.link_generation.fetch_add(1, Ordering::SeqCst);
            active.link.close().await;
        }
    }

    async fn send_call(&self, call: ClientCall) {
        let method = call.method_name();
        if let Err(e) = self.deps.signaling.send(call).await {
            // The forwarder reports the closed connection
            warn!("Failed to send {}: {}", method, e);
        }
    }

    fn schedule(&mut self, after: Duration, event: SessionEvent) {
        self.timers.retain(|timer| !timer.is_finished());

        let tx = self.tx.clone();
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(event);
        }));
    }

    /// Release whatever is still held, whichever way the session ended
    async fn shutdown(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        self.forwarder.abort();

        self.close_link().await;
        self.recognition_run.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.recognition.take() {
            self.deps.recognizer.stop(handle).await;
        }
        if let Some(media) = self.media.take() {
            media.release().await;
        }
        self.deps.signaling.close().await;

        self.view_tx.send_replace(self.state.view());
    }
}
