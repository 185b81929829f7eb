//! WebSocket signaling server
//!
//! Binds a TCP listener and runs the accept loop as a task on the current
//! runtime. Each connection is served by its own task; the returned handle
//! stops the accept loop and asks every open connection to close.

use super::handler::handle_connection;
use crate::config::SignalingServerConfig;
use crate::hub::SignalingHub;
use captionroom_protocol::{Error, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// WebSocket signaling server
pub struct WebSocketSignalingServer {
    /// Server address
    addr: SocketAddr,

    /// Shared hub
    hub: SignalingHub,
}

impl WebSocketSignalingServer {
    /// Create a server from a validated configuration
    pub fn new(config: SignalingServerConfig) -> Result<Self> {
        config.validate()?;
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            Error::InvalidConfig(format!("Invalid bind address {}: {}", config.bind_address, e))
        })?;

        Ok(Self {
            addr,
            hub: SignalingHub::new(config),
        })
    }

    /// Get the hub (for inspection and in-process sessions)
    pub fn hub(&self) -> SignalingHub {
        self.hub.clone()
    }

    /// Get the configured address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind and start accepting connections
    ///
    /// Returns once the listener is bound, so the handle's
    /// [`local_addr`](WebSocketServerHandle::local_addr) is usable immediately
    /// (including when binding port 0).
    pub async fn start(self) -> std::io::Result<WebSocketServerHandle> {
        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind WebSocket server to {}: {}", self.addr, e);
                return Err(e);
            }
        };
        let local_addr = listener.local_addr()?;

        info!(
            "WebSocket signaling server bound and listening on ws://{}",
            local_addr
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let connection_shutdown = shutdown_tx.clone();
        let hub = self.hub;

        // Accept loop
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                info!("Accepted WebSocket connection from {}", peer_addr);
                                let hub = hub.clone();
                                let shutdown = connection_shutdown.subscribe();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, peer_addr, hub, shutdown).await {
                                        error!("WebSocket connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept WebSocket connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("WebSocket signaling server received shutdown signal");
                        break;
                    }
                }
            }

            info!("WebSocket signaling server accept loop exited");
        });

        Ok(WebSocketServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// Handle for controlling the WebSocket server
pub struct WebSocketServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl WebSocketServerHandle {
    /// Address the listener actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close open connections and wait for the accept loop
    pub async fn shutdown(self) {
        info!("Sending shutdown signal to WebSocket server");
        let _ = self.shutdown_tx.send(());

        if let Err(e) = self.task.await {
            error!("WebSocket accept loop ended abnormally: {}", e);
        }
    }
}
