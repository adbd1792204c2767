//! # Callgate-Server
//!
//! HTTP call-control surface for the callgate gateway: the axum router, CLI
//! arguments and the wiring from configuration to a running [`Gateway`].

pub mod api;
pub mod cli;

use std::sync::Arc;

use callgate_core::transport::loopback::{LoopbackOptions, LoopbackTransportFactory};
use callgate_core::{Gateway, GatewayConfig, Result, StaticMediaSource};
use callgate_webrtc::{OggFileSource, WebRtcTransportFactory};

use cli::TransportKind;

/// Frames of silence played by the loopback transport (five seconds)
const LOOPBACK_SILENCE_FRAMES: usize = 250;

/// Build a gateway for the selected transport engine
pub fn build_gateway(config: &GatewayConfig, transport: TransportKind) -> Result<Gateway> {
    let builder = Gateway::builder(config.clone());
    let builder = match transport {
        TransportKind::Webrtc => builder
            .transport_factory(Arc::new(WebRtcTransportFactory::new(
                config.webrtc.ice_servers.clone(),
            )?))
            .media_source(Arc::new(OggFileSource::new())),
        TransportKind::Loopback => builder
            .transport_factory(Arc::new(LoopbackTransportFactory::new(LoopbackOptions {
                auto_connect: true,
                ..Default::default()
            })))
            .media_source(Arc::new(StaticMediaSource::new().with_recording(
                config.media.file.clone(),
                StaticMediaSource::silence(LOOPBACK_SILENCE_FRAMES),
            ))),
    };
    builder.build()
}
