//! Detection acquisition thread.
//!
//! Runs a blocking [`DetectionSource`] on its own OS thread, applies the
//! per-frame selection rule and overwrites the shared [`LatestDetection`]
//! slot. The control loop never waits on this thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use shared::detection::select_detection;
use shared::detection_source::{DetectionSource, JsonLinesSource, SourceError};
use shared::{ConfidenceThresholds, LatestDetection};
use tracing::{debug, info, warn};

/// How a source run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceExit {
    /// Shutdown was requested
    Stopped,
    /// The source reported end of stream
    Ended,
    /// The source failed with an I/O error
    Failed,
}

/// Feed frames from `source` into `slot` until shutdown or the source ends.
///
/// Read timeouts are not errors; they give the loop a chance to notice
/// shutdown. The slot is cleared when the source stops producing.
pub fn pump_source(
    source: &mut dyn DetectionSource,
    slot: &LatestDetection,
    thresholds: &ConfidenceThresholds,
    shutdown: &AtomicBool,
    frames: &AtomicU64,
) -> SourceExit {
    let exit = loop {
        if shutdown.load(Ordering::SeqCst) {
            break SourceExit::Stopped;
        }
        match source.next_frame() {
            Ok(Some(detections)) => {
                let selected = select_detection(&detections, thresholds);
                slot.publish(selected);
                frames.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {
                info!("{}: stream ended", source.name());
                break SourceExit::Ended;
            }
            Err(SourceError::Timeout) => continue,
            Err(e) => {
                warn!("{}: read failed: {}", source.name(), e);
                break SourceExit::Failed;
            }
        }
    };
    slot.clear();
    exit
}

/// Handle to the acquisition thread.
pub struct AcquisitionHandle {
    shutdown: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    join_handle: Option<JoinHandle<()>>,
}

impl AcquisitionHandle {
    /// Frames published into the slot so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the thread and wait for it. Safe to call more than once.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                warn!("Acquisition thread panicked");
            } else {
                info!("Acquisition stopped after {} frames", self.frames());
            }
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Run one source on a dedicated thread until it ends or [`AcquisitionHandle::stop`].
pub fn spawn_source<S>(
    mut source: S,
    slot: Arc<LatestDetection>,
    thresholds: ConfidenceThresholds,
) -> std::io::Result<AcquisitionHandle>
where
    S: DetectionSource + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let frames = Arc::new(AtomicU64::new(0));

    let thread_shutdown = shutdown.clone();
    let thread_frames = frames.clone();
    let join_handle = std::thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || {
            info!("Acquisition started from {}", source.name());
            pump_source(
                &mut source,
                &slot,
                &thresholds,
                &thread_shutdown,
                &thread_frames,
            );
        })?;

    Ok(AcquisitionHandle {
        shutdown,
        frames,
        join_handle: Some(join_handle),
    })
}

/// Accept classifier connections on `listen` and pump each one in turn.
///
/// Only one classifier is served at a time. When it disconnects the slot is
/// cleared and the thread goes back to accepting.
pub fn spawn_tcp_acquisition(
    listen: SocketAddr,
    slot: Arc<LatestDetection>,
    thresholds: ConfidenceThresholds,
    poll_interval: Duration,
) -> std::io::Result<AcquisitionHandle> {
    let listener = TcpListener::bind(listen)?;
    listener.set_nonblocking(true)?;
    info!("Waiting for classifier on {}", listener.local_addr()?);

    let shutdown = Arc::new(AtomicBool::new(false));
    let frames = Arc::new(AtomicU64::new(0));

    let thread_shutdown = shutdown.clone();
    let thread_frames = frames.clone();
    let join_handle = std::thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || {
            while !thread_shutdown.load(Ordering::SeqCst) {
                let stream = match listener.accept() {
                    Ok((stream, peer)) => {
                        info!("Classifier connected from {}", peer);
                        stream
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(poll_interval);
                        continue;
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        std::thread::sleep(poll_interval);
                        continue;
                    }
                };

                let source = stream
                    .set_nonblocking(false)
                    .and_then(|_| JsonLinesSource::from_tcp(stream, poll_interval));
                let mut source = match source {
                    Ok(source) => source,
                    Err(e) => {
                        warn!("Could not set up classifier connection: {}", e);
                        continue;
                    }
                };

                let exit = pump_source(
                    &mut source,
                    &slot,
                    &thresholds,
                    &thread_shutdown,
                    &thread_frames,
                );
                debug!(
                    "{} finished ({:?}, {} malformed lines)",
                    source.name(),
                    exit,
                    source.skipped_lines()
                );
            }
        })?;

    Ok(AcquisitionHandle {
        shutdown,
        frames,
        join_handle: Some(join_handle),
    })
}
