//! Per-session inactivity reaper
//!
//! Armed when a session is registered. If the session is still negotiating or
//! connecting when its deadline passes, the reaper closes and removes it.
//! Reaching `Streaming` or `Closed` disarms the timer.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::SessionRegistry;
use crate::session::{Session, SessionState};

/// How a reaper task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperOutcome {
    /// Deadline passed and this task closed the session
    Reaped,
    /// Session started streaming or closed before the deadline
    Disarmed,
    /// Deadline passed but the session was no longer registered
    AlreadyRemoved,
}

/// Arm a reaper for `session`
pub fn spawn(session: Arc<Session>, registry: SessionRegistry) -> JoinHandle<ReaperOutcome> {
    tokio::spawn(run(session, registry))
}

pub async fn run(session: Arc<Session>, registry: SessionRegistry) -> ReaperOutcome {
    let mut state_rx = session.watch_state();

    tokio::select! {
        biased;
        _ = state_rx.wait_for(|s| matches!(s, SessionState::Streaming | SessionState::Closed)) => {
            debug!("Reaper for {} disarmed", session.id());
            return ReaperOutcome::Disarmed;
        }
        _ = tokio::time::sleep_until(session.deadline()) => {}
    }

    if !matches!(
        session.state(),
        SessionState::Negotiating | SessionState::Connecting
    ) {
        return ReaperOutcome::Disarmed;
    }

    if registry.terminate_session(&session, "inactivity timeout").await {
        info!("Auto-cleanup: Removed inactive call_id {}", session.id());
        ReaperOutcome::Reaped
    } else {
        ReaperOutcome::AlreadyRemoved
    }
}
