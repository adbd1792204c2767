//! One-shot decision handoff and the per-session decision waiter
//!
//! Every offer-flow session owns a [`DecisionSlot`]: a single-assignment
//! promise satisfied at most once. The first delivery wins; any later write is
//! dropped and reported as [`Delivery::AlreadyDecided`], so a caller never
//! blocks on a slot nobody reads.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pacer::MediaPacer;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionState};
use crate::transport::MediaSender;
use crate::types::{Action, Decision};

/// Result of handing a decision to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The waiter will receive the decision
    Delivered,
    /// A decision was already delivered, or the session never awaited one
    AlreadyDecided,
    /// The waiter already finished (deadline or close)
    WaiterGone,
}

/// Single-use handoff slot for one [`Decision`]
#[derive(Debug)]
pub struct DecisionSlot {
    tx: Mutex<Option<oneshot::Sender<Decision>>>,
}

impl DecisionSlot {
    /// Create a pending slot and the receiver its waiter observes
    pub fn channel() -> (Self, oneshot::Receiver<Decision>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// A slot that never accepts a decision (answer-flow sessions)
    pub fn closed() -> Self {
        Self {
            tx: Mutex::new(None),
        }
    }

    /// Whether a decision can still be delivered
    pub fn is_pending(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver a decision without blocking
    pub fn deliver(&self, decision: Decision) -> Delivery {
        let Some(tx) = self.tx.lock().take() else {
            return Delivery::AlreadyDecided;
        };
        match tx.send(decision) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::WaiterGone,
        }
    }
}

/// How a decision waiter finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Remote answer applied and the pacer started
    Accepted,
    /// The remote answer could not be applied; session closed
    RemoteDescriptionRejected,
    /// A closing action arrived through the slot; session closed
    Closed(Action),
    /// Deadline elapsed with no decision
    TimedOut,
    /// Another path closed the session first
    SessionClosed,
}

/// Waits for exactly one decision (or the deadline) for an offer-flow session
pub struct DecisionWaiter {
    session: Arc<Session>,
    registry: SessionRegistry,
    pacer: MediaPacer,
    sender: Arc<dyn MediaSender>,
    decisions: oneshot::Receiver<Decision>,
}

impl DecisionWaiter {
    pub fn new(
        session: Arc<Session>,
        registry: SessionRegistry,
        pacer: MediaPacer,
        sender: Arc<dyn MediaSender>,
        decisions: oneshot::Receiver<Decision>,
    ) -> Self {
        Self {
            session,
            registry,
            pacer,
            sender,
            decisions,
        }
    }

    pub fn spawn(self) -> JoinHandle<WaitOutcome> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> WaitOutcome {
        let call_id = self.session.id().clone();
        let mut state_rx = self.session.watch_state();

        let decision = tokio::select! {
            received = &mut self.decisions => match received {
                Ok(decision) => decision,
                Err(_) => {
                    debug!("{} Decision slot dropped", call_id);
                    return WaitOutcome::SessionClosed;
                }
            },
            _ = tokio::time::sleep_until(self.session.deadline()) => {
                info!("{} Timeout waiting for answer", call_id);
                return WaitOutcome::TimedOut;
            }
            _ = state_rx.wait_for(|s| s.is_closed()) => {
                debug!("{} Session closed while waiting for a decision", call_id);
                return WaitOutcome::SessionClosed;
            }
        };

        info!("{} Received action: {}", call_id, decision.action);

        if decision.action != Action::Accept {
            self.registry
                .terminate_session(&self.session, decision.action.as_str())
                .await;
            return WaitOutcome::Closed(decision.action);
        }

        let Some(remote) = decision.remote_description else {
            warn!("{} Accept carried no remote description", call_id);
            self.registry
                .terminate_session(&self.session, "accept without remote description")
                .await;
            return WaitOutcome::RemoteDescriptionRejected;
        };

        if self.session.state().is_closed() {
            return WaitOutcome::SessionClosed;
        }

        if let Err(e) = self.session.transport().set_remote_description(remote).await {
            error!("{} Error setting remote description: {}", call_id, e);
            self.registry
                .terminate_session(&self.session, "remote description rejected")
                .await;
            return WaitOutcome::RemoteDescriptionRejected;
        }

        if self.session.transition(SessionState::Connecting).is_err() {
            return WaitOutcome::SessionClosed;
        }

        self.pacer.spawn(Arc::clone(&self.session), Arc::clone(&self.sender));
        WaitOutcome::Accepted
    }
}
