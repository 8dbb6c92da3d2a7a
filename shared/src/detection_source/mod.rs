//! Detection source abstraction.
//!
//! The classifier runs outside this workspace. Whatever produces detections is
//! wrapped in a [`DetectionSource`], which the acquisition thread polls in a
//! blocking loop. Production uses [`JsonLinesSource`] fed by a TCP connection
//! from the classifier process; tests use [`mock::ScriptedSource`].

pub mod mock;

use std::io::{BufRead, BufReader, ErrorKind};
use std::net::TcpStream;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::detection::{BoundingBox, Detection, DetectionClass};

/// Error type for detection sources
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No frame arrived before the read timeout; the source is still usable
    #[error("timed out waiting for a frame")]
    Timeout,
}

pub type SourceResult<T> = Result<T, SourceError>;

/// A blocking producer of classified frames.
pub trait DetectionSource: Send {
    /// Block until the next frame arrives.
    ///
    /// Returns every detection in the frame, possibly none. `Ok(None)` means the
    /// stream ended cleanly and no further frames will come.
    fn next_frame(&mut self) -> SourceResult<Option<Vec<Detection>>>;

    /// Human readable name for logs.
    fn name(&self) -> &str;
}

/// One frame as the classifier sends it on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Capture time in unix milliseconds; absent means "now"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    #[serde(default)]
    pub detections: Vec<WireDetection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireDetection {
    pub class: DetectionClass,
    /// `[x1, y1, x2, y2]` in pixels
    pub bbox: [f64; 4],
    pub confidence: f64,
}

impl FrameMessage {
    /// Convert to detections stamped on the local monotonic clock.
    ///
    /// The wall-clock age of the frame is carried over so staleness checks see
    /// the real capture time. Timestamps in the future count as age zero.
    pub fn into_detections(self, now: Instant, now_unix: Duration) -> Vec<Detection> {
        let captured_at = match self.timestamp_ms {
            Some(ts) => {
                let age = now_unix.saturating_sub(Duration::from_millis(ts));
                now.checked_sub(age).unwrap_or(now)
            }
            None => now,
        };

        self.detections
            .into_iter()
            .map(|d| {
                let [x1, y1, x2, y2] = d.bbox;
                Detection::new(d.class, BoundingBox::new(x1, y1, x2, y2), d.confidence)
                    .with_captured_at(captured_at)
            })
            .collect()
    }
}

/// Parse one newline-delimited JSON frame.
pub fn parse_frame_line(line: &str) -> Result<FrameMessage, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Reads newline-delimited JSON frames from any buffered reader.
///
/// Malformed lines are logged and skipped. Blank lines are ignored.
pub struct JsonLinesSource<R> {
    reader: R,
    name: String,
    pending: Vec<u8>,
    skipped: u64,
}

impl<R: BufRead + Send> JsonLinesSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            name: name.into(),
            pending: Vec::new(),
            skipped: 0,
        }
    }

    /// Number of malformed lines dropped so far.
    pub fn skipped_lines(&self) -> u64 {
        self.skipped
    }
}

impl JsonLinesSource<BufReader<TcpStream>> {
    /// Wrap an accepted classifier connection.
    ///
    /// `poll_interval` bounds how long a single `next_frame` call may block so
    /// the caller can check for shutdown between frames.
    pub fn from_tcp(stream: TcpStream, poll_interval: Duration) -> std::io::Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        stream.set_read_timeout(Some(poll_interval))?;
        Ok(Self::new(BufReader::new(stream), format!("tcp:{peer}")))
    }
}

impl<R: BufRead + Send> DetectionSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> SourceResult<Option<Vec<Detection>>> {
        loop {
            // Partial lines survive a read timeout in `pending`
            match self.reader.read_until(b'\n', &mut self.pending) {
                Ok(0) => {
                    if self.pending.is_empty() {
                        return Ok(None);
                    }
                    // Final line without a trailing newline
                }
                Ok(_) => {
                    if self.pending.last() != Some(&b'\n') {
                        continue;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(SourceError::Timeout);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let line = std::mem::take(&mut self.pending);
            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() {
                continue;
            }

            match parse_frame_line(&text) {
                Ok(frame) => {
                    let now_unix = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default();
                    let detections = frame.into_detections(Instant::now(), now_unix);
                    debug!("{}: frame with {} detections", self.name, detections.len());
                    return Ok(Some(detections));
                }
                Err(e) => {
                    self.skipped += 1;
                    warn!("{}: skipping malformed frame: {}", self.name, e);
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
