//! WebSocket message handler for JSON-RPC 2.0 signaling
//!
//! Handles individual WebSocket connections and processes JSON-RPC messages.

use crate::hub::{HubConnection, SignalingHub};
use captionroom_protocol::{ClientCall, JsonRpcResponse, SessionId};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Message, Result as WsResult},
};
use tracing::{debug, error, info, instrument, warn};

/// How long a closing connection waits for queued frames to be written
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle a single WebSocket connection until it closes or the server shuts down
#[instrument(name = "ws_connection", skip(stream, hub, shutdown))]
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: SignalingHub,
    mut shutdown: broadcast::Receiver<()>,
) -> WsResult<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let HubConnection {
        session_id,
        mut events,
    } = hub.connect();
    info!(session_id = %session_id, "WebSocket session opened");

    // Replies and pongs produced by the read loop
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Message>();

    // Single writer: server events and request replies share the socket
    let writer_session = session_id.clone();
    let mut forward_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                Some(event) = events.recv() => match event.to_json() {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        error!("Failed to encode {} for {}: {}", event.method_name(), writer_session, e);
                        continue;
                    }
                },
                Some(reply) = reply_rx.recv() => reply,
                else => break,
            };

            if let Err(e) = ws_tx.send(msg).await {
                error!("Failed to send WebSocket message to {}: {}", writer_session, e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = shutdown.recv() => {
                info!(session_id = %session_id, "Closing WebSocket session for server shutdown");
                break;
            }
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                if let Some(reply) = dispatch(&hub, &session_id, &text) {
                    let _ = reply_tx.send(Message::Text(reply));
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = reply_tx.send(Message::Pong(data));
            }
            Some(Ok(Message::Close(_))) | None => {
                info!(session_id = %session_id, "WebSocket connection closed by client");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(session_id = %session_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Cleanup on disconnect; closing both channels lets the writer flush and
    // send a close frame
    hub.disconnect(&session_id);
    drop(reply_tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut forward_task)
        .await
        .is_err()
    {
        debug!(session_id = %session_id, "Writer did not drain in time");
        forward_task.abort();
    }

    Ok(())
}

/// Decode one request, execute it and encode the reply
fn dispatch(hub: &SignalingHub, session_id: &SessionId, text: &str) -> Option<String> {
    let encoded = match ClientCall::from_request(text) {
        Ok((call, id)) => match hub.handle(session_id, call) {
            Ok(result) => JsonRpcResponse::new(result, id).to_json(),
            Err(e) => {
                debug!(session_id = %session_id, "Request failed: {}", e);
                e.to_rpc_error(id).to_json()
            }
        },
        Err(rpc_error) => {
            debug!(
                session_id = %session_id,
                "Rejected request: {}", rpc_error.error.message
            );
            rpc_error.to_json()
        }
    };

    match encoded {
        Ok(json) => Some(json),
        Err(e) => {
            error!("Failed to encode reply: {}", e);
            None
        }
    }
}
