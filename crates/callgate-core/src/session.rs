//! Session state machine
//!
//! ```text
//! Negotiating ──accept──▶ Connecting ──connected──▶ Streaming ──end/disconnect──▶ Closed
//!      │                      │                         │
//!      └── reject/terminate/hangup/deadline ────────────┴──────────────────────▶ Closed
//! ```
//!
//! Offer-flow sessions start in `Negotiating`, answer-flow sessions start in
//! `Connecting`. `Closed` is absorbing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::decision::DecisionSlot;
use crate::transport::Transport;
use crate::types::{CallDirection, CallId};

/// Lifecycle state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Local description produced, awaiting a decision
    Negotiating,
    /// Remote description applied, awaiting transport connectivity
    Connecting,
    /// Media flowing
    Streaming,
    /// Terminal
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Whether the state machine allows moving to `to`
    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Negotiating, Connecting) => true,
            (Connecting, Streaming) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Rejected state change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid session transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// One in-flight call
pub struct Session {
    id: CallId,
    direction: CallDirection,
    transport: Arc<dyn Transport>,
    decision: DecisionSlot,
    created_at: DateTime<Utc>,
    deadline: Instant,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Create a session whose reaper deadline is `timeout` from now
    pub fn new(
        id: CallId,
        direction: CallDirection,
        transport: Arc<dyn Transport>,
        decision: DecisionSlot,
        timeout: Duration,
    ) -> Self {
        let initial = match direction {
            CallDirection::Offer => SessionState::Negotiating,
            CallDirection::Answer => SessionState::Connecting,
        };
        let (state, _) = watch::channel(initial);
        Self {
            id,
            direction,
            transport,
            decision,
            created_at: Utc::now(),
            deadline: Instant::now() + timeout,
            state,
        }
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn decision(&self) -> &DecisionSlot {
        &self.decision
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Atomically move to `to`, returning the previous state
    pub fn transition(&self, to: SessionState) -> Result<SessionState, InvalidTransition> {
        let mut outcome = Err(InvalidTransition { from: to, to });
        self.state.send_if_modified(|current| {
            if current.can_transition_to(to) {
                outcome = Ok(*current);
                *current = to;
                true
            } else {
                outcome = Err(InvalidTransition { from: *current, to });
                false
            }
        });
        if let Ok(from) = outcome {
            debug!("Session {} moved {} -> {}", self.id, from, to);
        }
        outcome
    }

    /// Mark the session closed and close its transport.
    ///
    /// Returns true for the caller that performed the transition.
    pub(crate) async fn close(&self, reason: &str) -> bool {
        let first = self.transition(SessionState::Closed).is_ok();
        if let Err(e) = self.transport.close().await {
            warn!("Error closing transport for {} ({}): {}", self.id, reason, e);
        }
        first
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .field("decision_pending", &self.decision.is_pending())
            .finish()
    }
}
