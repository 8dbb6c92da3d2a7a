use std::sync::Arc;

use crate::aim::{AimError, AimSolution};
use crate::state::ModeKind;

/// Events emitted for external callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum SentryCallbackEvent {
    /// Mode transition
    ModeChanged {
        from: ModeKind,
        to: ModeKind,
        reason: TransitionReason,
    },
    /// A tracking tick produced an aim solution
    Aimed {
        distance_ft: f64,
        aim: AimSolution,
    },
    /// Person seen while tracking; laser forced off
    PersonInterlock { confidence: f64 },
    /// A bird was seen but could not be aimed at this tick
    AimRejected {
        distance_ft: f64,
        reason: AimRejection,
    },
}

/// Why the mode changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    BirdConfirmed,
    PersonInView,
    TargetLost,
    OperatorPause,
    OperatorResume,
    /// A new calibration was loaded while tracking
    CalibrationReplaced,
}

/// Why a bird could not be aimed at
#[derive(Debug, Clone, PartialEq)]
pub enum AimRejection {
    /// Estimated distance outside the configured bounds
    DistanceOutOfRange { min_ft: f64, max_ft: f64 },
    /// Aiming transform could not produce a reachable position
    Aim(AimError),
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

/// Callback function type
pub type SentryCallback = Arc<dyn Fn(&SentryCallbackEvent) + Send + Sync>;
