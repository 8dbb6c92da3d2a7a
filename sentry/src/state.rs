use std::fmt;

use serde::{Deserialize, Serialize};
use shared::Detection;

/// Sentry operating modes.
///
/// Counters live inside the mode that uses them, so leaving a mode always
/// discards them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SentryMode {
    /// Laser off, waiting for consecutive bird sightings
    Search { confirm_frames: u32 },
    /// Aiming at a confirmed bird
    Track {
        lost_frames: u32,
        last_distance_ft: Option<f64>,
    },
    /// Operator hold; detections ignored
    Paused,
}

impl SentryMode {
    pub fn initial() -> Self {
        SentryMode::Search { confirm_frames: 0 }
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            SentryMode::Search { .. } => ModeKind::Search,
            SentryMode::Track { .. } => ModeKind::Track,
            SentryMode::Paused => ModeKind::Paused,
        }
    }
}

/// Mode without its data, for logs and callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeKind {
    Search,
    Track,
    Paused,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeKind::Search => write!(f, "SEARCH"),
            ModeKind::Track => write!(f, "TRACK"),
            ModeKind::Paused => write!(f, "PAUSED"),
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy)]
pub enum SentryEvent {
    /// One control tick with this tick's selected detection, already
    /// filtered for staleness
    Tick(Option<Detection>),
    /// Operator pause
    Pause,
    /// Operator resume
    Resume,
}
