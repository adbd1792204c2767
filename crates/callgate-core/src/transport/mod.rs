//! Transport engine capability
//!
//! The gateway never speaks ICE, DTLS or SRTP itself. It drives a per-call
//! [`Transport`] created by a [`TransportFactory`], and pushes audio through the
//! [`MediaSender`] the transport hands out.
//!
//! Implementations:
//! - `callgate-webrtc` provides the production adapter on top of the `webrtc` crate
//! - [`loopback`] fabricates SDP in-process for dry runs and tests

pub mod loopback;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::errors::Result;
use crate::types::{CallId, ConnectivityState, SessionDescription};

/// One paced audio frame ready to be written to the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub payload: Bytes,
    pub duration: Duration,
}

/// Creates one transport per call
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, call_id: &CallId) -> Result<Arc<dyn Transport>>;
}

/// Per-call negotiation primitive
///
/// `close` must be idempotent and safe to call concurrently from any owner.
/// Closing publishes [`ConnectivityState::Closed`] so every task watching
/// [`Transport::connectivity`] unblocks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach an outbound audio track and return its sender
    async fn add_outbound_media(&self) -> Result<Arc<dyn MediaSender>>;

    /// Produce a local offer
    async fn create_local_offer(&self) -> Result<SessionDescription>;

    /// Produce a local answer to the remote offer applied with
    /// [`Transport::set_remote_description`]
    async fn create_local_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description; starts candidate gathering
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply the remote peer's description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Resolves once candidate gathering has completed or the transport closed
    async fn gathering_complete(&self);

    /// Current local description including gathered candidates
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Connectivity updates
    fn connectivity(&self) -> watch::Receiver<ConnectivityState>;

    /// Close the transport; a no-op after the first call
    async fn close(&self) -> Result<()>;
}

/// Outbound media sender attached to a transport
#[async_trait]
pub trait MediaSender: Send + Sync {
    /// Write one frame with its playback duration
    async fn write_frame(&self, frame: &MediaFrame) -> Result<()>;

    /// Block until the next batch of feedback (RTCP) arrives; returns the number of packets read.
    /// Errors once the transport is closed.
    async fn read_feedback(&self) -> Result<usize>;
}
