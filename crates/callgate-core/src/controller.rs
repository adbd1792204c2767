//! Signaling controller
//!
//! Drives a fresh transport through offer or answer generation, registers the
//! resulting session and starts the tasks that own it afterwards:
//!
//! - offer flow: reaper + decision waiter, optional callback
//! - answer flow: reaper + media pacer
//!
//! Any failure after the transport was created closes it before the error is
//! returned.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, MetadataConfig};
use crate::decision::{DecisionSlot, DecisionWaiter};
use crate::errors::{GatewayError, Result};
use crate::notifier::CallbackNotifier;
use crate::pacer::MediaPacer;
use crate::payload::{AnswerRequest, AnswerResponse, Event, OfferRequest};
use crate::reaper;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::transport::{MediaSender, Transport, TransportFactory};
use crate::types::{CallDirection, CallId, SessionDescription};

/// Timing and payload settings for the controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub session_timeout: Duration,
    pub gather_timeout: Duration,
    pub metadata: MetadataConfig,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

impl ControllerSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            session_timeout: config.session_timeout(),
            gather_timeout: config.gather_timeout(),
            metadata: config.metadata.clone(),
        }
    }
}

pub struct SignalingController {
    registry: SessionRegistry,
    transports: Arc<dyn TransportFactory>,
    pacer: MediaPacer,
    notifier: CallbackNotifier,
    settings: ControllerSettings,
}

impl SignalingController {
    pub fn new(
        registry: SessionRegistry,
        transports: Arc<dyn TransportFactory>,
        pacer: MediaPacer,
        notifier: CallbackNotifier,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            registry,
            transports,
            pacer,
            notifier,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Generate a local offer and start waiting for the remote decision
    pub async fn create_offer(&self, request: OfferRequest) -> Result<Event> {
        let call_id = CallId::from_request(request.call_id.as_deref());
        self.ensure_not_live(&call_id)?;

        let transport = self.transports.create(&call_id).await?;
        let (sender, local) = match self.negotiate_offer(&call_id, &transport).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                close_quietly(&call_id, &transport).await;
                return Err(e);
            }
        };

        let (slot, decisions) = DecisionSlot::channel();
        let session = self.register(&call_id, CallDirection::Offer, transport, slot).await?;

        DecisionWaiter::new(
            Arc::clone(&session),
            self.registry.clone(),
            self.pacer.clone(),
            sender,
            decisions,
        )
        .spawn();

        let event = Event::connect(&call_id, &request.from, &request.to, &local, &self.settings.metadata);

        if let Some(url) = request.callback_url() {
            debug!("{} Sending callback to {}", call_id, url);
            self.notifier.notify(url, &event);
        }

        info!("{} Offer created", call_id);
        Ok(event)
    }

    /// Answer a remote offer and start streaming once connected
    pub async fn create_answer(&self, request: AnswerRequest) -> Result<AnswerResponse> {
        request.validate()?;

        let call_id = CallId::from_request(request.call_id.as_deref());
        self.ensure_not_live(&call_id)?;

        let transport = self.transports.create(&call_id).await?;
        let remote = SessionDescription::offer(request.session.sdp.clone());
        let (sender, local) = match self.negotiate_answer(&call_id, &transport, remote).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                close_quietly(&call_id, &transport).await;
                return Err(e);
            }
        };

        let session = self
            .register(&call_id, CallDirection::Answer, transport, DecisionSlot::closed())
            .await?;
        self.pacer.spawn(session, sender);

        info!("{} Answer created", call_id);
        Ok(AnswerResponse {
            call_id,
            answer: local,
        })
    }

    fn ensure_not_live(&self, call_id: &CallId) -> Result<()> {
        if self.registry.contains(call_id) {
            return Err(GatewayError::duplicate_call(call_id.as_str()));
        }
        Ok(())
    }

    async fn negotiate_offer(
        &self,
        call_id: &CallId,
        transport: &Arc<dyn Transport>,
    ) -> Result<(Arc<dyn MediaSender>, SessionDescription)> {
        let sender = transport.add_outbound_media().await?;
        let offer = transport.create_local_offer().await?;
        transport.set_local_description(offer).await?;
        let local = self.gathered_description(call_id, transport).await?;
        Ok((sender, local))
    }

    async fn negotiate_answer(
        &self,
        call_id: &CallId,
        transport: &Arc<dyn Transport>,
        remote: SessionDescription,
    ) -> Result<(Arc<dyn MediaSender>, SessionDescription)> {
        transport.set_remote_description(remote).await?;
        let sender = transport.add_outbound_media().await?;
        let answer = transport.create_local_answer().await?;
        transport.set_local_description(answer).await?;
        let local = self.gathered_description(call_id, transport).await?;
        Ok((sender, local))
    }

    /// Wait for gathering (bounded), then read the final local description
    async fn gathered_description(
        &self,
        call_id: &CallId,
        transport: &Arc<dyn Transport>,
    ) -> Result<SessionDescription> {
        if tokio::time::timeout(self.settings.gather_timeout, transport.gathering_complete())
            .await
            .is_err()
        {
            warn!(
                "{} ICE gathering did not finish within {:?}, using partial description",
                call_id, self.settings.gather_timeout
            );
        }

        transport
            .local_description()
            .await
            .ok_or_else(|| GatewayError::transport("local_description", "no local description"))
    }

    async fn register(
        &self,
        call_id: &CallId,
        direction: CallDirection,
        transport: Arc<dyn Transport>,
        slot: DecisionSlot,
    ) -> Result<Arc<Session>> {
        let session = Arc::new(Session::new(
            call_id.clone(),
            direction,
            Arc::clone(&transport),
            slot,
            self.settings.session_timeout,
        ));

        if let Err(e) = self.registry.insert(Arc::clone(&session)) {
            close_quietly(call_id, &transport).await;
            return Err(e);
        }

        reaper::spawn(Arc::clone(&session), self.registry.clone());
        Ok(session)
    }
}

async fn close_quietly(call_id: &CallId, transport: &Arc<dyn Transport>) {
    if let Err(e) = transport.close().await {
        warn!("{} Error closing transport after failure: {}", call_id, e);
    }
}
