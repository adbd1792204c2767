//! # Callgate-Core
//!
//! Session lifecycle and call coordination for the callgate signaling gateway.
//!
//! This crate provides:
//! - A concurrent registry of in-flight calls
//! - The per-call state machine and one-shot decision handoff
//! - Offer and answer generation over a pluggable transport
//! - Timeout-driven reaping of abandoned calls
//! - Real-time pacing of recorded audio once a call connects
//! - Best-effort callback delivery of call events
//!
//! ## Architecture
//!
//! The transport engine (ICE/DTLS/SRTP) and the recorded media live behind the
//! [`TransportFactory`] and [`MediaSource`] traits. `callgate-webrtc` provides
//! the production implementations; [`transport::loopback`] and
//! [`StaticMediaSource`] run everything in-process.

pub mod config;
pub mod controller;
pub mod decision;
pub mod dispatcher;
pub mod errors;
pub mod logging;
pub mod media;
pub mod notifier;
pub mod pacer;
pub mod payload;
pub mod reaper;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

pub use crate::config::GatewayConfig;
pub use controller::{ControllerSettings, SignalingController};
pub use decision::{DecisionSlot, DecisionWaiter, Delivery, WaitOutcome};
pub use dispatcher::{ActionDispatcher, ActionStatus};
pub use errors::{GatewayError, Result};
pub use media::{FrameReader, MediaSource, SourceFrame, StaticMediaSource};
pub use notifier::CallbackNotifier;
pub use pacer::{MediaPacer, PacerConfig, PacerOutcome};
pub use payload::{ActionRequest, ActionResponse, AnswerRequest, AnswerResponse, Event, OfferRequest};
pub use registry::SessionRegistry;
pub use session::{Session, SessionState};
pub use transport::{MediaFrame, MediaSender, Transport, TransportFactory};
pub use types::{Action, CallDirection, CallId, ConnectivityState, Decision, SdpType, SessionDescription};

use std::sync::Arc;

/// Fully wired gateway: registry, controller and dispatcher sharing one state
#[derive(Clone)]
pub struct Gateway {
    registry: SessionRegistry,
    controller: Arc<SignalingController>,
    dispatcher: ActionDispatcher,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn create_offer(&self, request: OfferRequest) -> Result<Event> {
        self.controller.create_offer(request).await
    }

    pub async fn create_answer(&self, request: AnswerRequest) -> Result<AnswerResponse> {
        self.controller.create_answer(request).await
    }

    pub async fn dispatch_action(&self, request: &ActionRequest) -> Result<ActionStatus> {
        self.dispatcher.dispatch(request).await
    }

    /// Close every live call; returns how many were closed
    pub async fn shutdown(&self) -> usize {
        self.registry.drain("shutdown").await
    }
}

/// Builder for [`Gateway`]
pub struct GatewayBuilder {
    config: GatewayConfig,
    transports: Option<Arc<dyn TransportFactory>>,
    media: Option<Arc<dyn MediaSource>>,
    registry: SessionRegistry,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            transports: None,
            media: None,
            registry: SessionRegistry::new(),
        }
    }

    pub fn transport_factory(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    pub fn media_source(mut self, media: Arc<dyn MediaSource>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        self.config.validate()?;
        let transports = self
            .transports
            .ok_or_else(|| GatewayError::config("a transport factory is required"))?;
        let media = self
            .media
            .ok_or_else(|| GatewayError::config("a media source is required"))?;

        let pacer = MediaPacer::new(self.config.pacer_config(), media, self.registry.clone());
        let notifier = CallbackNotifier::new(self.config.callback_timeout())?;
        let controller = SignalingController::new(
            self.registry.clone(),
            transports,
            pacer,
            notifier,
            ControllerSettings::from_config(&self.config),
        );

        Ok(Gateway {
            dispatcher: ActionDispatcher::new(self.registry.clone()),
            controller: Arc::new(controller),
            registry: self.registry,
        })
    }
}
