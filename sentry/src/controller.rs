//! Applies orchestrator commands to the gateways.
//!
//! Gateway errors never propagate out of [`HardwareController::apply`]; the
//! control loop must keep ticking so the person interlock keeps running while
//! a device is unreachable. Motion failures are logged and dropped. A laser
//! OFF that cannot be confirmed is logged as critical and re-sent on every
//! subsequent apply until the gate acknowledges it.
//!
//! Motion requests and laser ON share a per-apply time budget, so a stalled
//! stage costs at most one budget per tick. Laser OFF is never cut short.
//! Laser ON and pattern start are withheld until the stage has acknowledged
//! an aim point since the laser was last turned off.

use std::time::Duration;

use hardware::{LaserGate, MotionStreamer};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::HardwareCommand;

/// Outcome of applying one tick's commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub laser_failures: usize,
    pub motion_failures: usize,
    /// Laser OFF is commanded but not yet acknowledged
    pub laser_off_unconfirmed: bool,
    /// Laser ON was requested but the stage holds no acknowledged aim
    pub laser_withheld: bool,
}

/// Outcome of the shutdown sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub pattern_stopped: bool,
    pub laser_off_confirmed: bool,
    pub motion_released: bool,
}

/// Owns both gateways and applies commands to them.
pub struct HardwareController<L, M> {
    laser: L,
    motion: M,
    /// Last laser state commanded, acknowledged or not
    laser_intent: Option<bool>,
    laser_off_unconfirmed: bool,
    /// Stage acknowledged an aim point since the laser was last turned off
    aimed: bool,
    command_budget: Duration,
    teardown_deadline: Duration,
    laser_retry_interval: Duration,
}

impl<L: LaserGate, M: MotionStreamer> HardwareController<L, M> {
    pub fn new(laser: L, motion: M, teardown_deadline: Duration) -> Self {
        Self {
            laser,
            motion,
            laser_intent: None,
            laser_off_unconfirmed: false,
            aimed: false,
            command_budget: Duration::from_millis(50),
            teardown_deadline,
            laser_retry_interval: Duration::from_millis(100),
        }
    }

    /// Time allowed per [`apply`](Self::apply) for motion and laser ON
    /// requests. Usually one control period.
    pub fn with_command_budget(mut self, budget: Duration) -> Self {
        self.command_budget = budget;
        self
    }

    /// Pause between laser OFF attempts during teardown.
    pub fn with_laser_retry_interval(mut self, interval: Duration) -> Self {
        self.laser_retry_interval = interval;
        self
    }

    pub fn laser_off_unconfirmed(&self) -> bool {
        self.laser_off_unconfirmed
    }

    pub fn is_aimed(&self) -> bool {
        self.aimed
    }

    pub fn laser(&self) -> &L {
        &self.laser
    }

    pub fn motion(&self) -> &M {
        &self.motion
    }

    pub fn motion_mut(&mut self) -> &mut M {
        &mut self.motion
    }

    async fn set_laser(&mut self, on: bool) -> bool {
        self.laser_intent = Some(on);
        if !on {
            self.aimed = false;
        }
        match self.laser.set(on).await {
            Ok(_) => {
                if self.laser_off_unconfirmed {
                    if on {
                        debug!("Pending laser OFF superseded by ON");
                    } else {
                        info!("Laser OFF acknowledged after earlier failures");
                    }
                }
                self.laser_off_unconfirmed = false;
                true
            }
            Err(e) if on => {
                warn!("Laser ON failed: {}", e);
                false
            }
            Err(e) => {
                self.laser_off_unconfirmed = true;
                error!("CRITICAL: laser OFF not acknowledged: {}", e);
                false
            }
        }
    }

    /// Laser ON bounded by `deadline`. A request cut short may still reach
    /// the device, so the gate's cached state is dropped.
    async fn set_laser_on_until(&mut self, deadline: Instant) -> bool {
        match tokio::time::timeout_at(deadline, self.set_laser(true)).await {
            Ok(acknowledged) => acknowledged,
            Err(_) => {
                warn!("Laser ON exceeded the {:?} command budget", self.command_budget);
                self.laser.invalidate();
                false
            }
        }
    }

    /// Apply one tick's commands in order.
    pub async fn apply(&mut self, commands: &[HardwareCommand]) -> ApplyReport {
        let mut report = ApplyReport::default();
        let deadline = Instant::now() + self.command_budget;

        let has_laser_command = commands
            .iter()
            .any(|c| matches!(c, HardwareCommand::SetLaser(_)));
        let retry_off =
            self.laser_off_unconfirmed && !has_laser_command && self.laser_intent == Some(false);
        if retry_off && !self.set_laser(false).await {
            report.laser_failures += 1;
        }

        for command in commands {
            match command {
                HardwareCommand::SetLaser(true) if !self.aimed => {
                    warn!("Laser ON withheld, stage has not reached an aim point");
                    report.laser_withheld = true;
                    // Withholding ON must not stall a pending OFF
                    if self.laser_off_unconfirmed && !self.set_laser(false).await {
                        report.laser_failures += 1;
                    }
                }
                HardwareCommand::SetLaser(true) => {
                    if !self.set_laser_on_until(deadline).await {
                        report.laser_failures += 1;
                    }
                }
                HardwareCommand::SetLaser(false) => {
                    if !self.set_laser(false).await {
                        report.laser_failures += 1;
                    }
                }
                HardwareCommand::MoveAbsolute(aim) => {
                    match tokio::time::timeout_at(deadline, self.motion.move_absolute(aim.position()))
                        .await
                    {
                        Ok(Ok(_)) => self.aimed = true,
                        Ok(Err(e)) => {
                            self.aimed = false;
                            warn!("Move to X={:.3} Y={:.3} failed: {}", aim.motor_x_mm, aim.motor_y_mm, e);
                            report.motion_failures += 1;
                        }
                        Err(_) => {
                            self.aimed = false;
                            warn!(
                                "Move to X={:.3} Y={:.3} exceeded the {:?} command budget",
                                aim.motor_x_mm, aim.motor_y_mm, self.command_budget
                            );
                            report.motion_failures += 1;
                        }
                    }
                }
                HardwareCommand::StartPattern { .. } if !self.aimed => {
                    debug!("Pattern start withheld, stage has not reached an aim point");
                }
                HardwareCommand::StartPattern { center, size_mm } => {
                    let start = self.motion.start_pattern(center.position(), *size_mm);
                    match tokio::time::timeout_at(deadline, start).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!("Pattern start failed: {}", e);
                            report.motion_failures += 1;
                        }
                        Err(_) => {
                            warn!("Pattern start exceeded the {:?} command budget", self.command_budget);
                            report.motion_failures += 1;
                        }
                    }
                }
                HardwareCommand::StopPattern => {
                    match tokio::time::timeout_at(deadline, self.motion.stop_pattern()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!("Pattern stop failed: {}", e);
                            report.motion_failures += 1;
                        }
                        Err(_) => {
                            warn!("Pattern stop exceeded the {:?} command budget", self.command_budget);
                            report.motion_failures += 1;
                        }
                    }
                }
            }
        }

        report.laser_off_unconfirmed = self.laser_off_unconfirmed;
        report
    }

    /// Stop the pattern and force the laser off, waiting for acknowledgment
    /// until the teardown deadline.
    pub async fn stop_outputs(&mut self) -> (bool, bool) {
        let stop = self.motion.stop_pattern();
        let pattern_stopped = match tokio::time::timeout(self.teardown_deadline, stop).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Pattern stop during teardown failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Pattern stop during teardown timed out after {:?}", self.teardown_deadline);
                false
            }
        };
        self.aimed = false;

        // Go to the device even if OFF was acknowledged a moment ago
        self.laser.invalidate();
        self.laser_intent = Some(false);

        let deadline = Instant::now() + self.teardown_deadline;
        let mut attempts = 0u32;
        let laser_off = loop {
            attempts += 1;
            match tokio::time::timeout_at(deadline, self.laser.set(false)).await {
                Ok(Ok(_)) => {
                    self.laser_off_unconfirmed = false;
                    break true;
                }
                Ok(Err(e)) => {
                    self.laser_off_unconfirmed = true;
                    error!("CRITICAL: laser OFF attempt {} during teardown failed: {}", attempts, e);
                }
                Err(_) => {
                    self.laser_off_unconfirmed = true;
                    break false;
                }
            }
            if Instant::now() + self.laser_retry_interval >= deadline {
                break false;
            }
            tokio::time::sleep(self.laser_retry_interval).await;
        };

        if laser_off {
            info!("Laser OFF confirmed for shutdown");
        } else {
            error!(
                "CRITICAL: laser OFF unconfirmed after {:?} teardown deadline ({} attempts)",
                self.teardown_deadline, attempts
            );
        }

        (pattern_stopped, laser_off)
    }

    /// Release the motion link.
    pub async fn release_motion(&mut self) -> bool {
        match self.motion.close().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Releasing motion link failed: {}", e);
                false
            }
        }
    }

    /// Full shutdown: stop pattern, laser off, `stop_acquisition`, release motion.
    ///
    /// Every step tolerates having run before, so calling this twice is safe.
    pub async fn teardown<F: FnOnce()>(&mut self, stop_acquisition: F) -> TeardownReport {
        let (pattern_stopped, laser_off_confirmed) = self.stop_outputs().await;
        stop_acquisition();
        let motion_released = self.release_motion().await;
        TeardownReport {
            pattern_stopped,
            laser_off_confirmed,
            motion_released,
        }
    }
}
