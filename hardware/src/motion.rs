//! Absolute-position motion streaming and the deterrence pattern.
//!
//! The motion endpoint is a Klipper printer board whose X/Y steppers drive the
//! laser mirror. The deterrence pattern is a Klipper macro (`GRID_DEFINE`,
//! `GRID_START`, `GRID_STOP`) that loops over four corners on its own. The
//! macro may leave the board in relative mode, so every absolute move re-sends
//! `G90` first.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::GatewayError;
use crate::moonraker::MoonrakerClient;
use crate::retry::{retry_bounded, RetryPolicy};

/// Absolute stage coordinates in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorPosition {
    pub x_mm: f64,
    pub y_mm: f64,
}

impl MotorPosition {
    pub fn new(x_mm: f64, y_mm: f64) -> Self {
        Self { x_mm, y_mm }
    }

    pub fn distance_to(&self, other: &MotorPosition) -> f64 {
        (self.x_mm - other.x_mm).hypot(self.y_mm - other.y_mm)
    }
}

/// Mechanical travel limits of the stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelEnvelope {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Default for TravelEnvelope {
    fn default() -> Self {
        Self {
            x_min: 0.0,
            x_max: 207.0,
            y_min: 0.0,
            y_max: 136.8,
        }
    }
}

impl TravelEnvelope {
    pub fn contains(&self, p: &MotorPosition) -> bool {
        (self.x_min..=self.x_max).contains(&p.x_mm) && (self.y_min..=self.y_max).contains(&p.y_mm)
    }

    pub fn clamp(&self, p: MotorPosition) -> MotorPosition {
        MotorPosition::new(
            p.x_mm.clamp(self.x_min, self.x_max),
            p.y_mm.clamp(self.y_min, self.y_max),
        )
    }
}

/// Result of an absolute move request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionAck {
    /// The move was sent and acknowledged
    Moved,
    /// A running pattern already covers this target; no move was sent
    Absorbed,
}

/// Absolute-position command sink with a repeating pattern mode.
#[async_trait]
pub trait MotionStreamer: Send {
    /// Home both axes and park at the neutral position.
    async fn home(&mut self) -> Result<(), GatewayError>;

    /// Move to an absolute position. Always preceded by `G90`.
    async fn move_absolute(&mut self, target: MotorPosition) -> Result<MotionAck, GatewayError>;

    /// Start the pattern centered on `center`. No-op if already running there.
    async fn start_pattern(&mut self, center: MotorPosition, size_mm: f64)
        -> Result<(), GatewayError>;

    /// Stop the pattern. No-op if not running.
    async fn stop_pattern(&mut self) -> Result<(), GatewayError>;

    fn pattern_running(&self) -> bool;

    /// Release the link. Safe to call more than once.
    async fn close(&mut self) -> Result<(), GatewayError>;
}

/// Tunables for [`MoonrakerMotion`].
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSettings {
    pub neutral: MotorPosition,
    pub envelope: TravelEnvelope,
    pub feedrate_mm_per_min: f64,
    pub pattern_speed_mm_per_min: u32,
    pub pattern_dwell_ms: u32,
    /// A target within this distance of the running pattern's center is absorbed
    pub recenter_tolerance_mm: f64,
    pub command_policy: RetryPolicy,
    pub homing_policy: RetryPolicy,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            neutral: MotorPosition::new(108.5, 71.0),
            envelope: TravelEnvelope::default(),
            feedrate_mm_per_min: 6000.0,
            pattern_speed_mm_per_min: 12000,
            pattern_dwell_ms: 100,
            recenter_tolerance_mm: 1.0,
            command_policy: RetryPolicy::new(2, Duration::from_millis(500)),
            homing_policy: RetryPolicy::once(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ActivePattern {
    center: MotorPosition,
    size_mm: f64,
}

/// `G90` + `G1` absolute move.
pub fn absolute_move_script(target: MotorPosition, feedrate_mm_per_min: f64) -> String {
    format!(
        "G90\nG1 X{:.3} Y{:.3} F{:.0}",
        target.x_mm, target.y_mm, feedrate_mm_per_min
    )
}

/// Square of edge `size_mm` around `center`, clamped to the envelope.
///
/// Order is bottom-left, bottom-right, top-right, top-left.
pub fn pattern_corners(
    center: MotorPosition,
    size_mm: f64,
    envelope: &TravelEnvelope,
) -> [MotorPosition; 4] {
    let h = size_mm / 2.0;
    [
        (-h, -h),
        (h, -h),
        (h, h),
        (-h, h),
    ]
    .map(|(dx, dy)| envelope.clamp(MotorPosition::new(center.x_mm + dx, center.y_mm + dy)))
}

pub fn grid_define_script(corners: &[MotorPosition; 4], speed: u32, dwell_ms: u32) -> String {
    let mut script = String::from("GRID_DEFINE");
    for (i, c) in corners.iter().enumerate() {
        script.push_str(&format!(" X{n}={:.3} Y{n}={:.3}", c.x_mm, c.y_mm, n = i + 1));
    }
    script.push_str(&format!(" SPEED={speed} DWELL={dwell_ms}"));
    script
}

/// Motion streamer backed by Moonraker.
pub struct MoonrakerMotion {
    client: MoonrakerClient,
    settings: MotionSettings,
    pattern: Option<ActivePattern>,
}

impl MoonrakerMotion {
    pub fn new(client: MoonrakerClient, settings: MotionSettings) -> Self {
        Self {
            client,
            settings,
            pattern: None,
        }
    }

    pub fn settings(&self) -> &MotionSettings {
        &self.settings
    }

    async fn send(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        script: String,
    ) -> Result<(), GatewayError> {
        let client = self.client.clone();
        retry_bounded(operation, policy, || {
            let client = client.clone();
            let script = script.clone();
            async move { client.gcode_script(&script).await }
        })
        .await
    }
}

#[async_trait]
impl MotionStreamer for MoonrakerMotion {
    async fn home(&mut self) -> Result<(), GatewayError> {
        info!("Homing stage");
        let homing = self.settings.homing_policy;
        self.send("home", &homing, "G28\nM400".to_string()).await?;
        self.pattern = None;

        let park = absolute_move_script(self.settings.neutral, self.settings.feedrate_mm_per_min);
        self.send("park", &homing, format!("{park}\nM400")).await?;
        info!(
            "Stage homed, parked at X={:.3} Y={:.3}",
            self.settings.neutral.x_mm, self.settings.neutral.y_mm
        );
        Ok(())
    }

    async fn move_absolute(&mut self, target: MotorPosition) -> Result<MotionAck, GatewayError> {
        if let Some(active) = self.pattern {
            if active.center.distance_to(&target) <= self.settings.recenter_tolerance_mm {
                return Ok(MotionAck::Absorbed);
            }
            // Target moved away from the pattern; it must not keep driving the stage
            self.stop_pattern().await?;
        }

        let policy = self.settings.command_policy;
        let script = absolute_move_script(target, self.settings.feedrate_mm_per_min);
        self.send("move", &policy, script).await?;
        debug!("Moved to X={:.3} Y={:.3}", target.x_mm, target.y_mm);
        Ok(MotionAck::Moved)
    }

    async fn start_pattern(
        &mut self,
        center: MotorPosition,
        size_mm: f64,
    ) -> Result<(), GatewayError> {
        if let Some(active) = self.pattern {
            if active.size_mm == size_mm
                && active.center.distance_to(&center) <= self.settings.recenter_tolerance_mm
            {
                return Ok(());
            }
            self.stop_pattern().await?;
        }

        let corners = pattern_corners(center, size_mm, &self.settings.envelope);
        let define = grid_define_script(
            &corners,
            self.settings.pattern_speed_mm_per_min,
            self.settings.pattern_dwell_ms,
        );
        let policy = self.settings.command_policy;
        self.send("pattern define", &policy, define).await?;
        self.send("pattern start", &policy, "GRID_START".to_string())
            .await?;

        self.pattern = Some(ActivePattern { center, size_mm });
        info!(
            "Pattern started at X={:.3} Y={:.3} size {:.1}mm",
            center.x_mm, center.y_mm, size_mm
        );
        Ok(())
    }

    async fn stop_pattern(&mut self) -> Result<(), GatewayError> {
        if self.pattern.is_none() {
            return Ok(());
        }
        let policy = self.settings.command_policy;
        self.send("pattern stop", &policy, "GRID_STOP".to_string())
            .await?;
        self.pattern = None;
        info!("Pattern stopped");
        Ok(())
    }

    fn pattern_running(&self) -> bool {
        self.pattern.is_some()
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        self.client.close().await;
        Ok(())
    }
}
