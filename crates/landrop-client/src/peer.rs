//! One WebRTC peer session per transfer: offer/answer, trickled ICE, and
//! the `fileTransfer` data channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use landrop_shared::constants::{DATA_CHANNEL_LABEL, DATA_CHANNEL_PACKET_LIFETIME_MS};
use landrop_shared::protocol::ChannelMessage;

use crate::error::ClientError;

/// What a peer session reports back to the engine.
#[derive(Debug)]
pub enum PeerEvent {
    ChannelOpen,
    ChannelMessage(ChannelMessage),
    /// A locally gathered candidate, serialized for the signaling hub.
    LocalCandidate(String),
    /// The connection or its ICE transport reached failed/disconnected.
    ConnectionFailed,
}

/// A single peer connection with its `fileTransfer` channel. Cheap to
/// clone; all state is shared.
#[derive(Clone)]
pub struct PeerSession {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    /// Candidates received before the remote description; flushed after.
    early_candidates: Arc<Mutex<Vec<RTCIceCandidateInit>>>,
    remote_described: Arc<AtomicBool>,
}

impl PeerSession {
    async fn build_api() -> Result<webrtc::api::API, ClientError> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(webrtc::Error::from)?;
        Ok(APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build())
    }

    async fn new_connection(
        stun_servers: &[String],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self, ClientError> {
        let api = Self::build_api().await?;
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: vec![RTCIceServer {
                    urls: stun_servers.to_vec(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await?,
        );

        let session = Self {
            pc,
            channel: Arc::new(RwLock::new(None)),
            early_candidates: Arc::new(Mutex::new(Vec::new())),
            remote_described: Arc::new(AtomicBool::new(false)),
        };
        session.monitor_connection(events.clone());
        session.forward_candidates(events);
        Ok(session)
    }

    fn monitor_connection(&self, events: mpsc::UnboundedSender<PeerEvent>) {
        let tx = events.clone();
        self.pc.on_peer_connection_state_change(Box::new(move |state| {
            let tx = tx.clone();
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                        let _ = tx.send(PeerEvent::ConnectionFailed);
                    }
                    RTCPeerConnectionState::Connected => {
                        debug!("Peer connection established");
                    }
                    _ => {}
                }
            })
        }));

        self.pc.on_ice_connection_state_change(Box::new(move |state| {
            let tx = events.clone();
            Box::pin(async move {
                if matches!(
                    state,
                    RTCIceConnectionState::Failed | RTCIceConnectionState::Disconnected
                ) {
                    let _ = tx.send(PeerEvent::ConnectionFailed);
                }
            })
        }));
    }

    fn forward_candidates(&self, events: mpsc::UnboundedSender<PeerEvent>) {
        self.pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => match serde_json::to_string(&init) {
                        Ok(json) => {
                            let _ = tx.send(PeerEvent::LocalCandidate(json));
                        }
                        Err(err) => warn!(error = %err, "Failed to serialize candidate"),
                    },
                    Err(err) => warn!(error = %err, "Failed to export candidate"),
                }
            })
        }));
    }

    fn attach_channel_handlers(
        channel: &Arc<RTCDataChannel>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) {
        let open_tx = events.clone();
        channel.on_open(Box::new(move || {
            let _ = open_tx.send(PeerEvent::ChannelOpen);
            Box::pin(async {})
        }));

        channel.on_message(Box::new(move |msg| {
            let tx = events.clone();
            Box::pin(async move {
                let text = String::from_utf8_lossy(&msg.data);
                match ChannelMessage::from_json(&text) {
                    Ok(parsed) => {
                        let _ = tx.send(PeerEvent::ChannelMessage(parsed));
                    }
                    Err(err) => warn!(error = %err, "Dropping unparseable channel frame"),
                }
            })
        }));
    }

    /// Sender side: create the connection and the `fileTransfer` channel,
    /// produce the serialized local offer.
    pub async fn initiate(
        stun_servers: &[String],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<(Self, String), ClientError> {
        let session = Self::new_connection(stun_servers, events.clone()).await?;

        let channel = session
            .pc
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    max_packet_life_time: Some(DATA_CHANNEL_PACKET_LIFETIME_MS),
                    ..Default::default()
                }),
            )
            .await?;
        Self::attach_channel_handlers(&channel, events);
        *session.channel.write().await = Some(channel);

        let offer = session.pc.create_offer(None).await?;
        session.pc.set_local_description(offer.clone()).await?;
        let serialized = serde_json::to_string(&offer)
            .map_err(landrop_shared::error::ProtocolError::from)?;

        Ok((session, serialized))
    }

    /// Receiver side: apply the remote offer, adopt the announced data
    /// channel, produce the serialized local answer.
    pub async fn respond(
        stun_servers: &[String],
        remote_offer: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<(Self, String), ClientError> {
        let session = Self::new_connection(stun_servers, events.clone()).await?;

        let channel_slot = Arc::clone(&session.channel);
        session.pc.on_data_channel(Box::new(move |channel| {
            let channel_slot = Arc::clone(&channel_slot);
            let events = events.clone();
            Box::pin(async move {
                if channel.label() != DATA_CHANNEL_LABEL {
                    warn!(label = channel.label(), "Ignoring unexpected data channel");
                    return;
                }
                Self::attach_channel_handlers(&channel, events);
                *channel_slot.write().await = Some(channel);
            })
        }));

        let offer: RTCSessionDescription = serde_json::from_str(remote_offer)
            .map_err(landrop_shared::error::ProtocolError::from)?;
        session.pc.set_remote_description(offer).await?;
        session.mark_remote_described().await?;

        let answer = session.pc.create_answer(None).await?;
        session.pc.set_local_description(answer.clone()).await?;
        let serialized = serde_json::to_string(&answer)
            .map_err(landrop_shared::error::ProtocolError::from)?;

        Ok((session, serialized))
    }

    /// Sender side: the remote answer arrived through the hub.
    pub async fn apply_answer(&self, remote_answer: &str) -> Result<(), ClientError> {
        let answer: RTCSessionDescription = serde_json::from_str(remote_answer)
            .map_err(landrop_shared::error::ProtocolError::from)?;
        self.pc.set_remote_description(answer).await?;
        self.mark_remote_described().await
    }

    /// Apply a remote candidate, buffering it when the remote description
    /// has not been set yet (candidates can outrun the answer).
    pub async fn add_remote_candidate(&self, candidate_json: &str) -> Result<(), ClientError> {
        let init: RTCIceCandidateInit = serde_json::from_str(candidate_json)
            .map_err(landrop_shared::error::ProtocolError::from)?;

        if self.remote_described.load(Ordering::Acquire) {
            self.pc.add_ice_candidate(init).await?;
        } else {
            self.early_candidates.lock().await.push(init);
        }
        Ok(())
    }

    async fn mark_remote_described(&self) -> Result<(), ClientError> {
        self.remote_described.store(true, Ordering::Release);
        let buffered: Vec<RTCIceCandidateInit> =
            std::mem::take(&mut *self.early_candidates.lock().await);
        for init in buffered {
            self.pc.add_ice_candidate(init).await?;
        }
        Ok(())
    }

    /// Send one envelope on the data channel as a JSON text frame.
    pub async fn send(&self, msg: &ChannelMessage) -> Result<(), ClientError> {
        let channel = self.channel.read().await;
        let channel = channel.as_ref().ok_or(ClientError::ChannelClosed)?;
        if channel.ready_state() != RTCDataChannelState::Open {
            return Err(ClientError::ChannelClosed);
        }
        channel.send_text(msg.to_json()?).await?;
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            debug!(error = %err, "Peer connection close reported an error");
        }
    }
}
