//! In-process transport talking straight to a [`SignalingHub`]
//!
//! Requests and replies follow the same JSON-RPC shapes as the WebSocket
//! transport, minus the encoding. Used by tests and embedded setups.

use crate::collaborators::SignalingTransport;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use captionroom_protocol::{ClientCall, JsonRpcResponse, ServerFrame, SessionId};
use captionroom_signaling::{HubConnection, SignalingHub};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Connection to an in-process signaling hub
pub struct LocalTransport {
    hub: SignalingHub,
    session_id: SessionId,
    frames: Mutex<Option<mpsc::UnboundedSender<ServerFrame>>>,
    next_id: AtomicU64,
    forwarder: JoinHandle<()>,
}

impl LocalTransport {
    pub fn connect(hub: SignalingHub) -> (Self, mpsc::UnboundedReceiver<ServerFrame>) {
        let HubConnection {
            session_id,
            mut events,
        } = hub.connect();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let event_tx = frame_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event_tx.send(ServerFrame::Event(event)).is_err() {
                    break;
                }
            }
        });

        (
            Self {
                hub,
                session_id,
                frames: Mutex::new(Some(frame_tx)),
                next_id: AtomicU64::new(1),
                forwarder,
            },
            frame_rx,
        )
    }

    /// Id the hub assigned to this connection
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

#[async_trait]
impl SignalingTransport for LocalTransport {
    async fn send(&self, call: ClientCall) -> Result<()> {
        let frames = self.frames.lock();
        let Some(tx) = frames.as_ref() else {
            return Err(ClientError::Transport("connection closed".to_string()));
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!("{} -> {} (id {})", self.session_id, call.method_name(), id);
        let frame = match self.hub.handle(&self.session_id, call) {
            Ok(result) => ServerFrame::Response(JsonRpcResponse::new(result, id.into())),
            Err(e) => ServerFrame::Error(e.to_rpc_error(id.into())),
        };

        tx.send(frame)
            .map_err(|_| ClientError::Transport("connection closed".to_string()))
    }

    async fn close(&self) {
        if self.frames.lock().take().is_some() {
            self.hub.disconnect(&self.session_id);
        }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.hub.disconnect(&self.session_id);
        self.forwarder.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use captionroom_protocol::{JoinParams, RoomId, ServerEvent};
    use captionroom_signaling::SignalingServerConfig;

    #[tokio::test]
    async fn test_join_reply_and_events_arrive_as_frames() {
        let hub = SignalingHub::new(SignalingServerConfig::default());
        let (a, mut a_frames) = LocalTransport::connect(hub.clone());
        let (b, mut b_frames) = LocalTransport::connect(hub.clone());

        let join = |room: &str| {
            ClientCall::Join(JoinParams {
                room_id: RoomId::new(room),
            })
        };
        tokio_test::assert_ok!(a.send(join("abc")).await);
        assert!(matches!(
            a_frames.recv().await,
            Some(ServerFrame::Response(_))
        ));

        tokio_test::assert_ok!(b.send(join("abc")).await);
        let frame = a_frames.recv().await.unwrap();
        assert!(matches!(
            frame,
            ServerFrame::Event(ServerEvent::PeerJoined(ref params)) if &params.peer_id == b.session_id()
        ));

        b.close().await;
        let mut frames = Vec::new();
        while let Some(frame) = b_frames.recv().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 2);
        assert!(frames
            .iter()
            .any(|frame| matches!(frame, ServerFrame::Response(_))));
        assert!(frames
            .iter()
            .any(|frame| matches!(frame, ServerFrame::Event(ServerEvent::RoleAssigned(_)))));
        tokio_test::assert_err!(b.send(join("abc")).await);
    }
}
