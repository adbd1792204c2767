//! Media source capability
//!
//! A media source opens a named recording and yields its frames in order.
//! Each frame carries the absolute position counter (Ogg granule position for
//! Opus) reached at the end of the frame; the pacer derives frame durations
//! from consecutive positions.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{GatewayError, Result};

/// One frame read from a recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFrame {
    pub payload: Bytes,
    /// Position counter at the end of this frame, in samples
    pub position: u64,
}

/// Opens recordings by name
///
/// `open` may block on I/O; the pacer calls it from the blocking pool.
/// `next_frame` runs on the async worker once per tick and must not block.
pub trait MediaSource: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn FrameReader>>;
}

/// Sequential frame producer
pub trait FrameReader: Send {
    /// Next frame, or `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<SourceFrame>>;
}

/// In-memory recordings keyed by name
#[derive(Debug, Clone, Default)]
pub struct StaticMediaSource {
    recordings: HashMap<String, Arc<Vec<SourceFrame>>>,
}

impl StaticMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recording
    pub fn with_recording(mut self, name: impl Into<String>, frames: Vec<SourceFrame>) -> Self {
        self.recordings.insert(name.into(), Arc::new(frames));
        self
    }

    /// `count` frames of Opus silence, 20 ms apart at 48 kHz
    pub fn silence(count: usize) -> Vec<SourceFrame> {
        (1..=count as u64)
            .map(|i| SourceFrame {
                // Opus TOC byte for a 20 ms CELT frame followed by an empty payload
                payload: Bytes::from_static(&[0xf8, 0xff, 0xfe]),
                position: i * 960,
            })
            .collect()
    }
}

impl MediaSource for StaticMediaSource {
    fn open(&self, name: &str) -> Result<Box<dyn FrameReader>> {
        let frames = self.recordings.get(name).cloned().ok_or_else(|| {
            GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no recording named {}", name),
            ))
        })?;
        Ok(Box::new(StaticFrameReader { frames, next: 0 }))
    }
}

struct StaticFrameReader {
    frames: Arc<Vec<SourceFrame>>,
    next: usize,
}

impl FrameReader for StaticFrameReader {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        let frame = self.frames.get(self.next).cloned();
        if frame.is_some() {
            self.next += 1;
        }
        Ok(frame)
    }
}
