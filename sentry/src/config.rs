use std::time::Duration;

use hardware::{MotionSettings, MotorPosition, RetryPolicy, TravelEnvelope};
use serde::{Deserialize, Serialize};
use shared::ConfidenceThresholds;
use thiserror::Error;

/// Configuration validation failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Detection confidence and frame-count thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSettings {
    /// Minimum confidence for a bird to count
    pub bird_confidence: f64,
    /// Minimum confidence for a person to trigger the interlock
    pub person_confidence: f64,
    /// Consecutive bird ticks before SEARCH hands over to TRACK
    pub track_confirm_frames: u32,
    /// Consecutive ticks without a valid target before TRACK gives up
    pub lost_frames_to_exit: u32,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            bird_confidence: 0.25,
            person_confidence: 0.40,
            track_confirm_frames: 3,
            lost_frames_to_exit: 8,
        }
    }
}

/// Ground distances the laser may be aimed at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceBounds {
    pub min_ft: f64,
    pub max_ft: f64,
}

impl Default for DistanceBounds {
    fn default() -> Self {
        Self {
            min_ft: 3.0,
            max_ft: 30.0,
        }
    }
}

impl DistanceBounds {
    pub fn contains(&self, distance_ft: f64) -> bool {
        distance_ft.is_finite() && distance_ft >= self.min_ft && distance_ft <= self.max_ft
    }
}

/// Mount geometry and stage scaling for the aiming transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AimSettings {
    /// Height of the laser exit above the ground in meters
    pub laser_height_m: f64,
    /// Stage position where the beam is level, set after homing
    pub neutral: MotorPosition,
    pub x_mm_per_degree: f64,
    pub y_mm_per_degree: f64,
    /// +1 or -1 depending on which way the Y stepper tilts the mirror
    pub y_sign: f64,
    /// Mirror deflection doubles the beam angle, so the mirror turns half of it
    pub mirror_half_angle: bool,
    pub envelope: TravelEnvelope,
}

impl Default for AimSettings {
    fn default() -> Self {
        Self {
            laser_height_m: 1.119,
            neutral: MotorPosition::new(108.5, 71.0),
            // 720 mm rotation distance over 360 degrees
            x_mm_per_degree: 2.0,
            y_mm_per_degree: 2.0,
            y_sign: -1.0,
            mirror_half_angle: true,
            envelope: TravelEnvelope::default(),
        }
    }
}

/// Deterrence pattern parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSettings {
    /// Edge of the square pattern in stage millimetres (about one foot on the ground at mid range)
    pub size_mm: f64,
    pub speed_mm_per_min: u32,
    pub dwell_ms: u32,
    pub recenter_tolerance_mm: f64,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            size_mm: 2.0,
            speed_mm_per_min: 12000,
            dwell_ms: 100,
            recenter_tolerance_mm: 1.0,
        }
    }
}

/// Timeouts and retry bounds for the hardware links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub laser_timeout_ms: u64,
    pub laser_attempts: u32,
    /// An acknowledged laser state is physically re-sent at most this often
    pub laser_reassert_ms: u64,
    pub motion_timeout_ms: u64,
    pub motion_attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub homing_timeout_ms: u64,
    pub feedrate_mm_per_min: f64,
    /// Hard limit on how long shutdown waits for the laser OFF acknowledgment
    pub teardown_deadline_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            laser_timeout_ms: 2000,
            laser_attempts: 3,
            laser_reassert_ms: 1000,
            motion_timeout_ms: 500,
            motion_attempts: 2,
            backoff_initial_ms: 20,
            backoff_max_ms: 200,
            homing_timeout_ms: 60_000,
            feedrate_mm_per_min: 6000.0,
            teardown_deadline_ms: 5000,
        }
    }
}

/// Complete sentry configuration.
///
/// Built once at startup and handed to the orchestrator, the aiming transform
/// and the gateways. Nothing reads thresholds or geometry from anywhere else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentryConfig {
    pub thresholds: ThresholdSettings,
    pub distance: DistanceBounds,
    pub aim: AimSettings,
    pub pattern: PatternSettings,
    pub gateways: GatewaySettings,
}

impl SentryConfig {
    /// Reject configurations that cannot produce correct behavior.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        let t = &self.thresholds;
        for (name, value) in [
            ("bird_confidence", t.bird_confidence),
            ("person_confidence", t.person_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within 0..1, got {value}"));
            }
        }
        if t.track_confirm_frames == 0 {
            return invalid("track_confirm_frames must be at least 1".into());
        }
        if t.lost_frames_to_exit == 0 {
            return invalid("lost_frames_to_exit must be at least 1".into());
        }

        let d = &self.distance;
        if !(d.min_ft > 0.0 && d.min_ft < d.max_ft) {
            return invalid(format!(
                "distance bounds must satisfy 0 < min < max, got {}..{}",
                d.min_ft, d.max_ft
            ));
        }

        let a = &self.aim;
        if !(a.laser_height_m > 0.0) {
            return invalid(format!("laser_height_m must be positive, got {}", a.laser_height_m));
        }
        if !(a.x_mm_per_degree > 0.0 && a.y_mm_per_degree > 0.0) {
            return invalid("mm_per_degree scale factors must be positive".into());
        }
        if a.y_sign != 1.0 && a.y_sign != -1.0 {
            return invalid(format!("y_sign must be 1 or -1, got {}", a.y_sign));
        }
        let e = &a.envelope;
        if !(e.x_min < e.x_max && e.y_min < e.y_max) {
            return invalid("travel envelope is inverted or empty".into());
        }
        if !e.contains(&a.neutral) {
            return invalid("neutral position lies outside the travel envelope".into());
        }

        let p = &self.pattern;
        if !(p.size_mm > 0.0) || p.speed_mm_per_min == 0 || p.recenter_tolerance_mm < 0.0 {
            return invalid("pattern size and speed must be positive".into());
        }

        let g = &self.gateways;
        if g.laser_timeout_ms == 0 || g.motion_timeout_ms == 0 || g.homing_timeout_ms == 0 {
            return invalid("gateway timeouts must be non-zero".into());
        }
        if g.laser_attempts == 0 || g.motion_attempts == 0 {
            return invalid("gateway attempt counts must be at least 1".into());
        }
        if !(g.feedrate_mm_per_min > 0.0) {
            return invalid("feedrate must be positive".into());
        }
        if g.teardown_deadline_ms == 0 {
            return invalid("teardown_deadline_ms must be non-zero".into());
        }

        Ok(())
    }

    pub fn confidence_thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds {
            bird: self.thresholds.bird_confidence,
            person: self.thresholds.person_confidence,
        }
    }

    fn backoff(&self, policy: RetryPolicy) -> RetryPolicy {
        policy.with_backoff(
            Duration::from_millis(self.gateways.backoff_initial_ms),
            Duration::from_millis(self.gateways.backoff_max_ms),
        )
    }

    pub fn laser_policy(&self) -> RetryPolicy {
        self.backoff(RetryPolicy::new(
            self.gateways.laser_attempts,
            Duration::from_millis(self.gateways.laser_timeout_ms),
        ))
    }

    pub fn laser_reassert_interval(&self) -> Duration {
        Duration::from_millis(self.gateways.laser_reassert_ms)
    }

    pub fn teardown_deadline(&self) -> Duration {
        Duration::from_millis(self.gateways.teardown_deadline_ms)
    }

    /// Settings for the Moonraker motion streamer.
    pub fn motion_settings(&self) -> MotionSettings {
        MotionSettings {
            neutral: self.aim.neutral,
            envelope: self.aim.envelope,
            feedrate_mm_per_min: self.gateways.feedrate_mm_per_min,
            pattern_speed_mm_per_min: self.pattern.speed_mm_per_min,
            pattern_dwell_ms: self.pattern.dwell_ms,
            recenter_tolerance_mm: self.pattern.recenter_tolerance_mm,
            command_policy: self.backoff(RetryPolicy::new(
                self.gateways.motion_attempts,
                Duration::from_millis(self.gateways.motion_timeout_ms),
            )),
            homing_policy: RetryPolicy::once(Duration::from_millis(self.gateways.homing_timeout_ms)),
        }
    }
}
