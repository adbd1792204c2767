//! Ogg/Opus file media source
//!
//! Each Ogg page becomes one frame; its granule position is the frame's
//! position counter. The `OpusTags` comment page carries no audio and is
//! skipped.
//!
//! `open` reads the whole recording into memory, so frame reads inside the
//! pacer's tick loop never touch the filesystem.

use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use webrtc::media::io::ogg_reader::OggReader;

use callgate_core::errors::{GatewayError, Result};
use callgate_core::media::{FrameReader, MediaSource, SourceFrame};

const OPUS_TAGS_SIGNATURE: &[u8] = b"OpusTags";

/// Opens `.ogg` recordings from disk
#[derive(Debug, Clone)]
pub struct OggFileSource {
    root: Option<PathBuf>,
    verify_checksum: bool,
}

impl Default for OggFileSource {
    fn default() -> Self {
        Self {
            root: None,
            verify_checksum: true,
        }
    }
}

impl OggFileSource {
    /// Resolve names relative to the working directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative names against `root`
    pub fn in_dir(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Skip page CRC validation
    pub fn without_checksum(mut self) -> Self {
        self.verify_checksum = false;
        self
    }

    fn resolve(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl MediaSource for OggFileSource {
    fn open(&self, name: &str) -> Result<Box<dyn FrameReader>> {
        let path = self.resolve(name);
        let bytes = std::fs::read(&path)?;
        let eof = Arc::new(AtomicBool::new(false));
        let reader = EofTrackingReader {
            inner: Cursor::new(bytes),
            eof: Arc::clone(&eof),
        };

        let (ogg, header) = OggReader::new(reader, self.verify_checksum).map_err(|e| {
            GatewayError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: {}", path.display(), e),
            ))
        })?;
        debug!(
            "Loaded {} ({} channels, {} Hz)",
            path.display(),
            header.channels,
            header.sample_rate
        );

        Ok(Box::new(OggFrameReader { ogg, eof }))
    }
}

/// Records whether the underlying reader ever hit end of file
struct EofTrackingReader<R> {
    inner: R,
    eof: Arc<AtomicBool>,
}

impl<R: Read> Read for EofTrackingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.eof.store(true, Ordering::Relaxed);
        }
        Ok(n)
    }
}

struct OggFrameReader<R: Read> {
    ogg: OggReader<R>,
    eof: Arc<AtomicBool>,
}

impl<R: Read + Send> FrameReader for OggFrameReader<R> {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        loop {
            match self.ogg.parse_next_page() {
                Ok((payload, header)) => {
                    if payload.starts_with(OPUS_TAGS_SIGNATURE) {
                        continue;
                    }
                    return Ok(Some(SourceFrame {
                        payload: payload.freeze(),
                        position: header.granule_position,
                    }));
                }
                Err(_) if self.eof.load(Ordering::Relaxed) => return Ok(None),
                Err(e) => {
                    return Err(GatewayError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        e.to_string(),
                    )));
                }
            }
        }
    }
}
