//! webrtc-rs backed peer connections
//!
//! Each link sends and receives one audio and one video track. Candidates
//! travel as the JSON form of `RTCIceCandidateInit`.

use crate::collaborators::{PeerConnector, PeerEvents, PeerLink};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use captionroom_protocol::SessionId;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Opens webrtc-rs peer connections using the configured STUN/TURN servers
#[derive(Debug, Clone)]
pub struct WebRtcPeerConnector {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcPeerConnector {
    pub fn new(config: &ClientConfig) -> Self {
        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        Self { ice_servers }
    }

    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| ClientError::Negotiation(format!("Failed to register codecs: {}", e)))?;

        let interceptors = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| {
                ClientError::Negotiation(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptors)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await.map_err(|e| {
            ClientError::Negotiation(format!("Failed to create peer connection: {}", e))
        })?;

        Ok(Arc::new(peer_connection))
    }
}

#[async_trait]
impl PeerConnector for WebRtcPeerConnector {
    async fn open(
        &self,
        peer: SessionId,
        initiator: bool,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerLink>> {
        info!("Opening peer connection to {} (initiator={})", peer, initiator);
        let peer_connection = self.new_peer_connection().await?;

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            peer_connection
                .add_transceiver_from_kind(kind, None)
                .await
                .map_err(|e| {
                    ClientError::Negotiation(format!("Failed to add {:?} transceiver: {}", kind, e))
                })?;
        }

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let events = state_events.clone();
                Box::pin(async move {
                    debug!("Peer {} connection state: {}", events.peer_id(), state);
                    match state {
                        RTCPeerConnectionState::Connected => events.established(),
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                            events.closed()
                        }
                        _ => {}
                    }
                })
            },
        ));

        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                let encoded = candidate
                    .to_json()
                    .map_err(|e| e.to_string())
                    .and_then(|init| serde_json::to_string(&init).map_err(|e| e.to_string()));
                match encoded {
                    Ok(payload) => events.local_candidate(payload),
                    Err(e) => warn!("Failed to encode ICE candidate: {}", e),
                }
            })
        }));

        Ok(Box::new(WebRtcPeerLink {
            peer,
            peer_connection,
        }))
    }
}

struct WebRtcPeerLink {
    peer: SessionId,
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcPeerLink {
    async fn local_sdp(&self) -> Result<String> {
        self.peer_connection
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| ClientError::Negotiation("No local description".to_string()))
    }
}

#[async_trait]
impl PeerLink for WebRtcPeerLink {
    async fn create_offer(&self) -> Result<String> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection.set_local_description(offer).await?;
        debug!("Created offer for {}", self.peer);
        self.local_sdp().await
    }

    async fn accept_offer(&self, sdp: String) -> Result<String> {
        let offer = RTCSessionDescription::offer(sdp)?;
        self.peer_connection.set_remote_description(offer).await?;

        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection.set_local_description(answer).await?;
        debug!("Created answer for {}", self.peer);
        self.local_sdp().await
    }

    async fn accept_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.peer_connection.set_remote_description(answer).await?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: String) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_str(&candidate).map_err(|e| {
            ClientError::Signaling(format!("Failed to parse ICE candidate: {}", e))
        })?;
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) {
        info!("Closing peer connection to {}", self.peer);
        if let Err(e) = self.peer_connection.close().await {
            warn!("Failed to close peer connection to {}: {}", self.peer, e);
        }
    }
}
