//! JSON-RPC 2.0 over WebSocket

use crate::collaborators::SignalingTransport;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use captionroom_protocol::{ClientCall, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// WebSocket connection to a signaling server
pub struct SignalingClient {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    next_id: AtomicU64,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to the server named by `config.signaling_url`
    pub async fn from_config(
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerFrame>)> {
        config.validate()?;
        Self::connect(&config.signaling_url).await
    }

    /// Connect to `url` (ws:// or wss://)
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<ServerFrame>)> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("Connected to signaling server at {}", url);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_sender.send(message).await {
                    warn!("Failed to send to signaling server: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = ws_receiver.next().await {
                match message {
                    Ok(Message::Text(text)) => match ServerFrame::parse(&text) {
                        Ok(frame) => {
                            if frame_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring unreadable server message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling connection error: {}", e);
                        break;
                    }
                }
            }
            debug!("Signaling reader finished");
        });

        Ok((
            Self {
                outbound: Mutex::new(Some(outbound_tx)),
                next_id: AtomicU64::new(1),
                writer,
                reader,
            },
            frame_rx,
        ))
    }

    fn push(&self, message: Message) -> Result<()> {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(ClientError::Transport("connection closed".to_string()));
        };
        tx.send(message)
            .map_err(|_| ClientError::Transport("connection closed".to_string()))
    }
}

#[async_trait]
impl SignalingTransport for SignalingClient {
    async fn send(&self, call: ClientCall) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = call.to_request(Some(id.into()))?;
        debug!("-> {} (id {})", call.method_name(), id);
        self.push(Message::Text(text))
    }

    async fn close(&self) {
        if let Some(tx) = self.outbound.lock().take() {
            let _ = tx.send(Message::Close(None));
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_rejects_non_websocket_url() {
        let config = ClientConfig::default().with_signaling_url("http://127.0.0.1:8080");
        let result = SignalingClient::from_config(&config).await;
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }
}
