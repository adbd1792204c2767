//! WebRTC transport adapter
//!
//! Wraps an `RTCPeerConnection` behind the core [`Transport`] trait. ICE
//! connection state changes are republished on a watch channel; closing the
//! transport publishes `Closed` before tearing the peer connection down.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use callgate_core::errors::{GatewayError, Result};
use callgate_core::transport::{MediaFrame, MediaSender, Transport, TransportFactory};
use callgate_core::types::{CallId, ConnectivityState, SdpType, SessionDescription};

/// Largest RTCP datagram read by the feedback drain
const RTCP_BUFFER_SIZE: usize = 1500;

/// Shares one WebRTC API (codecs + interceptors) across every call
pub struct WebRtcTransportFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    /// `ice_servers` are STUN/TURN URLs; empty means host candidates only
    pub fn new(ice_servers: Vec<String>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| GatewayError::transport("register_default_codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| GatewayError::transport("register_default_interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_servers,
                ..Default::default()
            }]
        };

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, call_id: &CallId) -> Result<Arc<dyn Transport>> {
        let pc = self
            .api
            .new_peer_connection(RTCConfiguration {
                ice_servers: self.ice_servers.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| GatewayError::transport("new_peer_connection", e))?;

        let transport = WebRtcTransport::new(call_id.clone(), Arc::new(pc));
        debug!("Created peer connection for {}", call_id);
        Ok(Arc::new(transport))
    }
}

/// One peer connection carrying one outbound Opus track
pub struct WebRtcTransport {
    call_id: CallId,
    pc: Arc<RTCPeerConnection>,
    state: Arc<watch::Sender<ConnectivityState>>,
    gathering: Mutex<Option<mpsc::Receiver<()>>>,
    closed: AtomicBool,
}

impl WebRtcTransport {
    fn new(call_id: CallId, pc: Arc<RTCPeerConnection>) -> Self {
        let (state, _) = watch::channel(ConnectivityState::New);
        let state = Arc::new(state);

        let publisher = Arc::clone(&state);
        let id = call_id.clone();
        pc.on_ice_connection_state_change(Box::new(move |ice: RTCIceConnectionState| {
            if let Some(next) = map_ice_state(ice) {
                info!("{} ICE connection state changed: {}", id, ice);
                publisher.send_if_modified(|current| {
                    if *current == ConnectivityState::Closed || *current == next {
                        return false;
                    }
                    *current = next;
                    true
                });
            }
            Box::pin(async {})
        }));

        Self {
            call_id,
            pc,
            state,
            gathering: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

/// Map an ICE state onto core connectivity; `None` for states with no meaning
pub(crate) fn map_ice_state(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCIceConnectionState::New => Some(ConnectivityState::New),
        RTCIceConnectionState::Checking => Some(ConnectivityState::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(ConnectivityState::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCIceConnectionState::Closed => Some(ConnectivityState::Closed),
        _ => None,
    }
}

pub(crate) fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let converted = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(GatewayError::transport(
                "session_description",
                "rollback is not supported",
            ));
        }
    };
    converted.map_err(|e| GatewayError::transport("session_description", e))
}

pub(crate) fn from_rtc(desc: RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Offer,
    };
    SessionDescription {
        sdp: desc.sdp,
        sdp_type,
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn add_outbound_media(&self) -> Result<Arc<dyn MediaSender>> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            format!("callgate-{}", self.call_id),
        ));

        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| GatewayError::transport("add_track", e))?;

        Ok(Arc::new(WebRtcMediaSender { track, rtp_sender }))
    }

    async fn create_local_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| GatewayError::transport("create_offer", e))?;
        Ok(from_rtc(offer))
    }

    async fn create_local_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| GatewayError::transport("create_answer", e))?;
        Ok(from_rtc(answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc(desc)?;
        // Subscribe before applying so the completion signal cannot be missed
        let gathering = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| GatewayError::transport("set_local_description", e))?;
        *self.gathering.lock() = Some(gathering);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| GatewayError::transport("set_remote_description", e))
    }

    async fn gathering_complete(&self) {
        let pending = self.gathering.lock().take();
        let Some(mut gathering) = pending else {
            return;
        };
        let mut state = self.state.subscribe();
        tokio::select! {
            _ = gathering.recv() => {}
            _ = state.wait_for(|s| *s == ConnectivityState::Closed) => {}
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(from_rtc)
    }

    fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.send_replace(ConnectivityState::Closed);
        self.pc
            .close()
            .await
            .map_err(|e| GatewayError::transport("close", e))?;
        debug!("Closed peer connection for {}", self.call_id);
        Ok(())
    }
}

/// Writes Opus frames to the track and drains RTCP from its sender
pub struct WebRtcMediaSender {
    track: Arc<TrackLocalStaticSample>,
    rtp_sender: Arc<RTCRtpSender>,
}

#[async_trait]
impl MediaSender for WebRtcMediaSender {
    async fn write_frame(&self, frame: &MediaFrame) -> Result<()> {
        self.track
            .write_sample(&Sample {
                data: frame.payload.clone(),
                duration: frame.duration,
                ..Default::default()
            })
            .await
            .map_err(GatewayError::streaming)
    }

    async fn read_feedback(&self) -> Result<usize> {
        let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
        let (packets, _) = self
            .rtp_sender
            .read(&mut buf)
            .await
            .map_err(GatewayError::streaming)?;
        Ok(packets.len())
    }
}
