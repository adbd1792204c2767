//! # Callgate-WebRTC
//!
//! Production implementations of the callgate-core capabilities:
//!
//! - [`WebRtcTransportFactory`]: one `RTCPeerConnection` per call with a single
//!   outbound Opus track, ICE connectivity reported through the core
//!   connectivity channel
//! - [`OggFileSource`]: Ogg/Opus recordings read page by page, with the page
//!   granule position as the frame position counter

pub mod ogg;
pub mod transport;

pub use ogg::OggFileSource;
pub use transport::{WebRtcMediaSender, WebRtcTransport, WebRtcTransportFactory};
