//! Real-time media pacer
//!
//! Once a session's transport reports `Connected`, the pacer opens the
//! configured recording and writes one frame per tick. Each frame's duration
//! is derived from the position counter delta:
//!
//! ```text
//! duration_n = (pos_n - pos_{n-1}) / sample_rate
//! ```
//!
//! A side task drains transport feedback for as long as the pacer runs. The
//! pacer ends at end of stream, on the first read or write failure, or when
//! connectivity drops, and always terminates the session on the way out.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::errors::{GatewayError, Result};
use crate::media::{FrameReader, MediaSource};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionState};
use crate::transport::{MediaFrame, MediaSender};
use crate::types::{CallId, ConnectivityState};

/// Pacing parameters
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Tick cadence of the send loop
    pub tick_interval: Duration,
    /// Clock rate of the position counter
    pub sample_rate: u32,
    /// Recording to play
    pub media_name: String,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(20),
            sample_rate: 48_000,
            media_name: "output.ogg".to_string(),
        }
    }
}

/// How a pacing run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerOutcome {
    /// Every frame was written
    Completed { frames: usize },
    /// Connectivity dropped mid-stream
    Disconnected { frames: usize },
    /// Reading or writing a frame failed
    Failed { frames: usize },
    /// The transport went down before it ever connected
    NeverConnected,
    /// Another path closed the session first
    SessionClosed,
}

/// Duration of a frame given the previous and current position counters
pub fn frame_duration(previous: u64, current: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = current.saturating_sub(previous) as u128;
    let nanos = samples * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Starts one pacing task per connected session
#[derive(Clone)]
pub struct MediaPacer {
    config: Arc<PacerConfig>,
    source: Arc<dyn MediaSource>,
    registry: SessionRegistry,
}

impl MediaPacer {
    pub fn new(config: PacerConfig, source: Arc<dyn MediaSource>, registry: SessionRegistry) -> Self {
        Self {
            config: Arc::new(config),
            source,
            registry,
        }
    }

    pub fn spawn(&self, session: Arc<Session>, sender: Arc<dyn MediaSender>) -> JoinHandle<PacerOutcome> {
        let pacer = self.clone();
        tokio::spawn(async move { pacer.run(session, sender).await })
    }

    pub async fn run(&self, session: Arc<Session>, sender: Arc<dyn MediaSender>) -> PacerOutcome {
        let call_id = session.id().clone();
        let mut connectivity = session.transport().connectivity();
        let mut state_rx = session.watch_state();

        let reached = tokio::select! {
            r = connectivity.wait_for(|s| *s == ConnectivityState::Connected || s.is_down()) => {
                r.map(|s| *s).unwrap_or(ConnectivityState::Closed)
            }
            _ = state_rx.wait_for(|s| s.is_closed()) => return PacerOutcome::SessionClosed,
        };

        if reached != ConnectivityState::Connected {
            info!("{} Connectivity {} before streaming started", call_id, reached);
            self.registry
                .terminate_session(&session, "connectivity lost before streaming")
                .await;
            return PacerOutcome::NeverConnected;
        }

        if session.transition(SessionState::Streaming).is_err() {
            return PacerOutcome::SessionClosed;
        }
        info!("{} Connected, streaming {}", call_id, self.config.media_name);

        let mut reader = match self.open_media().await {
            Ok(reader) => reader,
            Err(e) => {
                error!("{} Could not open media {}: {}", call_id, self.config.media_name, e);
                self.registry
                    .terminate_session(&session, "media unavailable")
                    .await;
                return PacerOutcome::Failed { frames: 0 };
            }
        };

        let drain = tokio::spawn(drain_feedback(Arc::clone(&sender), call_id.clone()));

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut previous = 0u64;
        let mut frames = 0usize;

        let outcome = loop {
            tokio::select! {
                changed = connectivity.changed() => {
                    let down = changed.is_err() || connectivity.borrow_and_update().is_down();
                    if down {
                        info!("{} Disconnected after {} frames", call_id, frames);
                        break PacerOutcome::Disconnected { frames };
                    }
                }
                _ = ticker.tick() => {
                    let frame = match reader.next_frame() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            info!("{} All audio frames sent ({})", call_id, frames);
                            break PacerOutcome::Completed { frames };
                        }
                        Err(e) => {
                            error!("{} Error reading media: {}", call_id, e);
                            break PacerOutcome::Failed { frames };
                        }
                    };

                    let duration = frame_duration(previous, frame.position, self.config.sample_rate);
                    previous = frame.position;

                    let media = MediaFrame {
                        payload: frame.payload,
                        duration,
                    };
                    if let Err(e) = sender.write_frame(&media).await {
                        warn!("{} Error writing frame {}: {}", call_id, frames, e);
                        break PacerOutcome::Failed { frames };
                    }
                    frames += 1;
                }
            }
        };

        drain.abort();
        self.registry.terminate_session(&session, "stream ended").await;
        outcome
    }

    /// Open the recording on the blocking pool
    async fn open_media(&self) -> Result<Box<dyn FrameReader>> {
        let source = Arc::clone(&self.source);
        let name = self.config.media_name.clone();
        tokio::task::spawn_blocking(move || source.open(&name))
            .await
            .map_err(|e| GatewayError::streaming(format!("media open task failed: {}", e)))?
    }
}

/// Read and discard feedback until the sender reports an error
async fn drain_feedback(sender: Arc<dyn MediaSender>, call_id: CallId) {
    let mut packets = 0usize;
    loop {
        match sender.read_feedback().await {
            Ok(n) => packets += n,
            Err(e) => {
                debug!("{} Feedback drain stopped after {} packets: {}", call_id, packets, e);
                return;
            }
        }
    }
}
