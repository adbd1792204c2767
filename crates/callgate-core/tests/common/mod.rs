//! Shared harness for callgate-core integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use callgate_core::transport::loopback::{LoopbackOptions, LoopbackTransport, LoopbackTransportFactory};
use callgate_core::{ActionRequest, CallId, Gateway, GatewayConfig, OfferRequest, StaticMediaSource};
use serde_json::json;

/// Number of frames in the default test recording
pub const RECORDING_FRAMES: usize = 10;

pub struct Harness {
    pub gateway: Gateway,
    pub transports: Arc<LoopbackTransportFactory>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(LoopbackOptions::default())
    }

    pub fn with_options(options: LoopbackOptions) -> Self {
        Self::build(options, GatewayConfig::default())
    }

    pub fn build(options: LoopbackOptions, config: GatewayConfig) -> Self {
        Self::build_with_recording(options, config, RECORDING_FRAMES)
    }

    pub fn build_with_recording(options: LoopbackOptions, config: GatewayConfig, frames: usize) -> Self {
        let media = StaticMediaSource::new()
            .with_recording(config.media.file.clone(), StaticMediaSource::silence(frames));
        Self::build_with_media(options, config, media)
    }

    pub fn build_with_media(options: LoopbackOptions, config: GatewayConfig, media: StaticMediaSource) -> Self {
        let transports = Arc::new(LoopbackTransportFactory::new(options));
        let gateway = Gateway::builder(config)
            .transport_factory(transports.clone())
            .media_source(Arc::new(media))
            .build()
            .expect("gateway should build");
        Self { gateway, transports }
    }

    /// Create an offer and return its call id
    pub async fn offer(&self, call_id: Option<&str>) -> CallId {
        let event = self
            .gateway
            .create_offer(OfferRequest {
                to: "15550002".to_string(),
                from: "15550001".to_string(),
                callback_url: None,
                call_id: call_id.map(str::to_string),
            })
            .await
            .expect("offer should succeed");
        CallId::from(event.call_id().expect("event carries a call id"))
    }

    pub fn transport(&self, call_id: &CallId) -> Arc<LoopbackTransport> {
        self.transports
            .transport(call_id)
            .expect("transport was created")
    }
}

/// Accept carrying the answer the way callers send it
pub fn accept(call_id: &CallId) -> ActionRequest {
    let encoded = json!({"type": "answer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"}).to_string();
    serde_json::from_value(json!({
        "call_id": call_id.as_str(),
        "action": "accept",
        "connection": {"webrtc": {"sdp": encoded}},
        "messaging_product": "random"
    }))
    .expect("valid action request")
}

pub fn action(call_id: &str, action: &str) -> ActionRequest {
    ActionRequest {
        call_id: call_id.to_string(),
        action: action.to_string(),
        ..Default::default()
    }
}

/// Let spawned tasks run; advances the paused clock by one millisecond
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
