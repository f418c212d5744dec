//! webrtc-rs implementation of the transport seam

use super::transport::{
    ConnectionState, PeerTransport, RemoteStream, TransportEvent, TransportEventSink,
    TransportFactory,
};
use crate::config::ClientConfig;
use crate::media::LocalStream;
use crate::types::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

/// Builds one `RTCPeerConnection` per session from the client configuration
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<RTCIceServer>,
    remote_packet_buffer: usize,
}

impl WebRtcTransportFactory {
    pub fn new(config: &ClientConfig) -> Self {
        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        Self {
            ice_servers,
            remote_packet_buffer: config.remote_packet_buffer,
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    #[instrument(skip(self, sink), fields(peer_id = %peer_id))]
    async fn create(
        &self,
        peer_id: &str,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?);

        install_handlers(&peer_connection, sink, self.remote_packet_buffer);
        info!("Created peer connection");

        Ok(Arc::new(WebRtcPeerTransport {
            peer_id: peer_id.to_string(),
            peer_connection,
        }))
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// Forward every peer connection callback into the sink
fn install_handlers(pc: &Arc<RTCPeerConnection>, sink: TransportEventSink, buffer: usize) {
    let state_sink = sink.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let sink = state_sink.clone();
        Box::pin(async move {
            if let Some(state) = map_state(s) {
                debug!(peer_id = %sink.peer_id(), %state, "Peer connection state changed");
                sink.emit(TransportEvent::StateChanged(state));
            }
        })
    }));

    let negotiation_sink = sink.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let sink = negotiation_sink.clone();
        Box::pin(async move {
            sink.emit(TransportEvent::NegotiationNeeded);
        })
    }));

    let candidate_sink = sink.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = candidate_sink.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                trace!(peer_id = %sink.peer_id(), "ICE gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    sink.emit(TransportEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(e) => debug!(peer_id = %sink.peer_id(), "Failed to serialize ICE candidate: {}", e),
            }
        })
    }));

    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let sink = sink.clone();
        Box::pin(async move {
            if track.kind() != RTPCodecType::Audio {
                debug!(peer_id = %sink.peer_id(), "Ignoring non-audio remote track");
                return;
            }

            let (tx, rx) = mpsc::channel(buffer);
            let stream = RemoteStream {
                stream_id: track.stream_id(),
                track_id: track.id(),
                packets: rx,
            };
            info!(peer_id = %sink.peer_id(), stream_id = %stream.stream_id, "Remote audio track added");

            if sink.emit(TransportEvent::RemoteTrack(stream)) {
                tokio::spawn(pump_remote_track(track, tx, sink.peer_id().to_string()));
            }
        })
    }));
}

/// Read RTP from a remote track until it ends or nobody listens
async fn pump_remote_track(track: Arc<TrackRemote>, tx: mpsc::Sender<bytes::Bytes>, peer_id: String) {
    loop {
        let (packet, _) = match track.read_rtp().await {
            Ok(packet) => packet,
            Err(e) => {
                debug!("RTP read error for peer {}: {} (connection may be closed)", peer_id, e);
                break;
            }
        };

        match tx.try_send(packet.payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Remote packet queue full for peer {}, dropping packet", peer_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }

    debug!("Remote audio pump ended for peer {}", peer_id);
}

/// One webrtc-rs peer connection
pub struct WebRtcPeerTransport {
    peer_id: String,
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcPeerTransport {
    fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
        let parsed = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
            SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        };
        parsed.map_err(|e| Error::SdpError(format!("Failed to parse {}: {}", description.kind, e)))
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeerTransport {
    async fn add_local_stream(&self, stream: &LocalStream) -> Result<()> {
        for track in stream.tracks() {
            let sender = self
                .peer_connection
                .add_track(Arc::clone(track))
                .await
                .map_err(|e| Error::MediaTrackError(format!("Failed to add audio track: {}", e)))?;

            // RTCP has to be drained for interceptors to run
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }

        debug!("Local stream {} added to peer {}", stream.id(), self.peer_id);
        Ok(())
    }

    async fn add_audio_receiver(&self) -> Result<()> {
        self.peer_connection
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| {
                Error::PeerConnectionError(format!("Failed to add audio transceiver: {}", e))
            })?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        debug!("Created SDP offer for peer {}", self.peer_id);
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        debug!("Created SDP answer for peer {}", self.peer_id);
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = Self::to_rtc(description)?;
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        debug!("Setting remote description for peer {}", self.peer_id);
        let description = Self::to_rtc(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        let Some(mut pending) = self.peer_connection.pending_local_description().await else {
            debug!("No local offer to roll back for peer {}", self.peer_id);
            return Ok(());
        };
        debug!("Rolling back local offer for peer {}", self.peer_id);
        // the rollback keeps the pending SDP so it still parses
        pending.sdp_type = RTCSdpType::Rollback;
        self.peer_connection
            .set_local_description(pending)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to roll back local offer: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        trace!("Adding ICE candidate for peer {}: {}", self.peer_id, candidate.candidate);
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for peer {}", self.peer_id);
        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}
