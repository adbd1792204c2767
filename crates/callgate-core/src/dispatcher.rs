//! Action dispatcher
//!
//! Validates an external decision and routes it: closing actions terminate
//! the session directly, `accept` is handed to the session's decision waiter.
//! Unknown or already-closed calls yield a soft status, not an error.

use tracing::{debug, info};

use crate::decision::Delivery;
use crate::errors::{GatewayError, Result};
use crate::payload::{ActionRequest, ActionResponse};
use crate::registry::SessionRegistry;
use crate::types::{Action, CallId, Decision, SessionDescription};

/// Outcome reported back to the caller of `/load/action`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Processed,
    NoSession,
    AlreadyDecided,
}

impl ActionStatus {
    pub fn message(&self) -> &'static str {
        match self {
            ActionStatus::Processed => "Action processed successfully",
            ActionStatus::NoSession => "No corresponding offer for this call_id or already closed",
            ActionStatus::AlreadyDecided => "Action already processed for this call_id",
        }
    }

    pub fn response(self, request: &ActionRequest) -> ActionResponse {
        ActionResponse {
            status: self.message().to_string(),
            call_id: request.call_id.clone(),
            action: request.action.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    registry: SessionRegistry,
}

impl ActionDispatcher {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, request: &ActionRequest) -> Result<ActionStatus> {
        let call_id = request.call_id.trim();
        if call_id.is_empty() {
            return Err(GatewayError::validation("call_id is required"));
        }
        let call_id = CallId::from(call_id);

        let Some(session) = self.registry.get(&call_id) else {
            debug!("{} Action {} for unknown call", call_id, request.action);
            return Ok(ActionStatus::NoSession);
        };

        let action: Action = request.action.parse()?;
        info!("{} Dispatching action {}", call_id, action);

        if action.is_terminal() {
            let removed = self
                .registry
                .terminate_session(&session, action.as_str())
                .await;
            return Ok(if removed {
                ActionStatus::Processed
            } else {
                ActionStatus::NoSession
            });
        }

        let sdp = request
            .remote_sdp()
            .ok_or_else(|| GatewayError::validation("accept requires an SDP answer"))?;

        let status = match session
            .decision()
            .deliver(Decision::accept(SessionDescription::answer(sdp)))
        {
            Delivery::Delivered => ActionStatus::Processed,
            Delivery::AlreadyDecided => ActionStatus::AlreadyDecided,
            Delivery::WaiterGone => ActionStatus::NoSession,
        };
        Ok(status)
    }
}
