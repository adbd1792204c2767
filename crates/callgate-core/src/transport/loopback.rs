//! In-process loopback transport
//!
//! Fabricates SDP without touching the network. Used by the server's dry-run
//! mode and by the test suites, which drive connectivity by hand through
//! [`LoopbackTransport::set_connectivity`].

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::{MediaFrame, MediaSender, Transport, TransportFactory};
use crate::errors::{GatewayError, Result};
use crate::types::{CallId, ConnectivityState, SdpType, SessionDescription};

/// Behaviour switches for loopback transports
#[derive(Debug, Clone, Default)]
pub struct LoopbackOptions {
    /// Report `Connected` as soon as both descriptions are applied
    pub auto_connect: bool,
    /// Simulated candidate gathering time
    pub gather_delay: Duration,
    /// Never finish candidate gathering
    pub stall_gathering: bool,
    /// Fail transport creation
    pub fail_create: bool,
    /// Fail attaching the outbound media sender
    pub fail_add_media: bool,
    /// Reject remote descriptions
    pub fail_remote_description: bool,
    /// Fail every frame write after this many frames
    pub fail_writes_after: Option<usize>,
}

/// Factory that keeps a handle on every transport it created
#[derive(Debug, Default)]
pub struct LoopbackTransportFactory {
    options: LoopbackOptions,
    transports: DashMap<CallId, Arc<LoopbackTransport>>,
    created: AtomicUsize,
}

impl LoopbackTransportFactory {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            transports: DashMap::new(),
            created: AtomicUsize::new(0),
        }
    }

    /// The most recent transport created for a call
    pub fn transport(&self, call_id: &CallId) -> Option<Arc<LoopbackTransport>> {
        self.transports.get(call_id).map(|t| Arc::clone(t.value()))
    }

    /// Number of transports created so far
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for LoopbackTransportFactory {
    async fn create(&self, call_id: &CallId) -> Result<Arc<dyn Transport>> {
        if self.options.fail_create {
            return Err(GatewayError::transport(
                "create",
                "loopback transport configured to fail",
            ));
        }
        let transport = Arc::new(LoopbackTransport::new(call_id.clone(), self.options.clone()));
        self.transports.insert(call_id.clone(), Arc::clone(&transport));
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!("Created loopback transport for {}", call_id);
        Ok(transport)
    }
}

/// Loopback transport for one call
#[derive(Debug)]
pub struct LoopbackTransport {
    call_id: CallId,
    options: LoopbackOptions,
    state: watch::Sender<ConnectivityState>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    remote_applied: AtomicUsize,
    closed: AtomicBool,
    close_count: AtomicUsize,
    sender: Arc<LoopbackSender>,
    senders_attached: AtomicUsize,
}

impl LoopbackTransport {
    fn new(call_id: CallId, options: LoopbackOptions) -> Self {
        let (state, _) = watch::channel(ConnectivityState::New);
        let sender = Arc::new(LoopbackSender {
            frames: Mutex::new(Vec::new()),
            fail_writes_after: options.fail_writes_after,
            state: state.subscribe(),
            feedback_reads: AtomicUsize::new(0),
            feedback_readers: AtomicUsize::new(0),
        });
        Self {
            call_id,
            options,
            state,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            remote_applied: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
            sender,
            senders_attached: AtomicUsize::new(0),
        }
    }

    /// Publish a connectivity change as the engine would
    pub fn set_connectivity(&self, state: ConnectivityState) {
        if self.is_closed() {
            return;
        }
        self.state.send_replace(state);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of times `close` actually tore the transport down
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Number of remote descriptions applied
    pub fn remote_applied_count(&self) -> usize {
        self.remote_applied.load(Ordering::SeqCst)
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn senders_attached(&self) -> usize {
        self.senders_attached.load(Ordering::SeqCst)
    }

    /// Number of feedback reads ever started
    pub fn feedback_reads(&self) -> usize {
        self.sender.feedback_reads.load(Ordering::SeqCst)
    }

    /// Feedback reads currently in progress
    pub fn active_feedback_readers(&self) -> usize {
        self.sender.feedback_readers.load(Ordering::SeqCst)
    }

    /// Frames written through the outbound sender so far
    pub fn written_frames(&self) -> Vec<MediaFrame> {
        self.sender.frames.lock().clone()
    }

    fn fabricate_sdp(&self, sdp_type: SdpType) -> SessionDescription {
        let sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=callgate-{}\r\nt=0 0\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 127.0.0.1\r\n\
             a=rtpmap:111 opus/48000/2\r\na=sendrecv\r\n",
            chrono::Utc::now().timestamp_micros(),
            sdp_type
        );
        SessionDescription { sdp, sdp_type }
    }

    fn maybe_auto_connect(&self) {
        if self.options.auto_connect
            && self.local.lock().is_some()
            && self.remote.lock().is_some()
        {
            self.set_connectivity(ConnectivityState::Connected);
        }
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.is_closed() {
            return Err(GatewayError::transport(operation, "transport is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn add_outbound_media(&self) -> Result<Arc<dyn MediaSender>> {
        self.ensure_open("add_outbound_media")?;
        if self.options.fail_add_media {
            return Err(GatewayError::transport(
                "add_outbound_media",
                "loopback transport configured to fail",
            ));
        }
        self.senders_attached.fetch_add(1, Ordering::SeqCst);
        Ok(self.sender.clone())
    }

    async fn create_local_offer(&self) -> Result<SessionDescription> {
        self.ensure_open("create_local_offer")?;
        Ok(self.fabricate_sdp(SdpType::Offer))
    }

    async fn create_local_answer(&self) -> Result<SessionDescription> {
        self.ensure_open("create_local_answer")?;
        if self.remote.lock().is_none() {
            return Err(GatewayError::transport(
                "create_local_answer",
                "no remote offer applied",
            ));
        }
        Ok(self.fabricate_sdp(SdpType::Answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open("set_local_description")?;
        let mut desc = desc;
        desc.sdp.push_str("a=candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host\r\n");
        desc.sdp.push_str("a=end-of-candidates\r\n");
        *self.local.lock() = Some(desc);
        self.set_connectivity(ConnectivityState::Checking);
        self.maybe_auto_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open("set_remote_description")?;
        if self.options.fail_remote_description || desc.is_empty() {
            return Err(GatewayError::transport(
                "set_remote_description",
                "remote description rejected",
            ));
        }
        *self.remote.lock() = Some(desc);
        self.remote_applied.fetch_add(1, Ordering::SeqCst);
        self.maybe_auto_connect();
        Ok(())
    }

    async fn gathering_complete(&self) {
        if self.options.stall_gathering {
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(|s| *s == ConnectivityState::Closed).await;
            return;
        }
        if !self.options.gather_delay.is_zero() {
            tokio::time::sleep(self.options.gather_delay).await;
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ConnectivityState::Closed);
        debug!("Closed loopback transport for {}", self.call_id);
        Ok(())
    }
}

/// Records frames instead of sending them
#[derive(Debug)]
pub struct LoopbackSender {
    frames: Mutex<Vec<MediaFrame>>,
    fail_writes_after: Option<usize>,
    state: watch::Receiver<ConnectivityState>,
    feedback_reads: AtomicUsize,
    feedback_readers: AtomicUsize,
}

/// Counts a reader as active until dropped, including on abort
struct ReaderGuard<'a>(&'a AtomicUsize);

impl<'a> ReaderGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaSender for LoopbackSender {
    async fn write_frame(&self, frame: &MediaFrame) -> Result<()> {
        if *self.state.borrow() == ConnectivityState::Closed {
            return Err(GatewayError::streaming("transport is closed"));
        }
        let mut frames = self.frames.lock();
        if let Some(limit) = self.fail_writes_after {
            if frames.len() >= limit {
                return Err(GatewayError::streaming("loopback write failure"));
            }
        }
        frames.push(frame.clone());
        Ok(())
    }

    async fn read_feedback(&self) -> Result<usize> {
        self.feedback_reads.fetch_add(1, Ordering::SeqCst);
        let _active = ReaderGuard::enter(&self.feedback_readers);
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|s| *s == ConnectivityState::Closed).await;
        Err(GatewayError::streaming("transport is closed"))
    }
}
