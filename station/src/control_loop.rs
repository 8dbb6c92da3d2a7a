//! Fixed-rate control loop.
//!
//! Each tick: apply pending operator commands, snapshot the latest-detection
//! slot, drop it if stale, run the orchestrator and apply its commands. No
//! gateway error leaves the loop; only quit, an external shutdown or a panic
//! does, and every one of those is followed by [`ControlLoop::shutdown`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hardware::{LaserGate, MotionStreamer};
use sentry::controller::{HardwareController, TeardownReport};
use sentry::{HardwareCommand, ModeKind, Orchestrator};
use shared::config_storage::CalibrationStore;
use shared::latest::SlotSnapshot;
use shared::{Detection, LatestDetection};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::operator::OperatorCommand;

/// Log a status line this often, in ticks
const STATUS_EVERY_TICKS: u64 = 200;

/// Detection the orchestrator should see this tick.
///
/// A detection older than `staleness` at `now` counts as nothing in view.
pub fn fresh_detection(
    snapshot: &SlotSnapshot,
    now: Instant,
    staleness: Duration,
) -> Option<Detection> {
    snapshot
        .detection
        .filter(|d| !d.is_stale(now, staleness))
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Operator asked to quit
    Quit,
    /// External shutdown signal fired
    Shutdown,
}

/// Outcome of one [`ControlLoop::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Quit,
}

pub struct ControlLoop<L, M> {
    orchestrator: Orchestrator,
    controller: HardwareController<L, M>,
    slot: Arc<LatestDetection>,
    store: CalibrationStore,
    operator: UnboundedReceiver<OperatorCommand>,
    period: Duration,
    staleness: Duration,
    last_sequence: u64,
}

impl<L: LaserGate, M: MotionStreamer> ControlLoop<L, M> {
    pub fn new(
        orchestrator: Orchestrator,
        controller: HardwareController<L, M>,
        slot: Arc<LatestDetection>,
        store: CalibrationStore,
        operator: UnboundedReceiver<OperatorCommand>,
        period: Duration,
        staleness: Duration,
    ) -> Self {
        Self {
            orchestrator,
            controller,
            slot,
            store,
            operator,
            period,
            staleness,
            last_sequence: 0,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn controller(&self) -> &HardwareController<L, M> {
        &self.controller
    }

    /// Apply one operator command. Returns `true` for quit.
    async fn handle_operator(&mut self, command: OperatorCommand) -> bool {
        let commands: Vec<HardwareCommand> = match command {
            OperatorCommand::Quit => return true,
            OperatorCommand::Pause => self.orchestrator.pause(),
            OperatorCommand::Resume => self.orchestrator.resume(),
            OperatorCommand::LoadCalibration(name) => match self.store.load_model(&name) {
                Ok(model) => {
                    info!("Loaded calibration session '{}'", name);
                    self.orchestrator.replace_calibration(model)
                }
                Err(e) => {
                    warn!("Keeping current calibration, '{}' unusable: {}", name, e);
                    Vec::new()
                }
            },
        };
        self.controller.apply(&commands).await;
        false
    }

    /// Run a single control tick at time `now`.
    pub async fn step(&mut self, now: Instant) -> StepOutcome {
        loop {
            match self.operator.try_recv() {
                Ok(command) => {
                    if self.handle_operator(command).await {
                        info!("Quit requested");
                        return StepOutcome::Quit;
                    }
                }
                // A closed console is not a quit
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let snapshot = self.slot.snapshot();
        let detection = fresh_detection(&snapshot, now, self.staleness);
        if snapshot.detection.is_some() && detection.is_none() {
            debug!("Dropping stale detection (seq {})", snapshot.sequence);
        }
        self.last_sequence = snapshot.sequence;

        let commands = self.orchestrator.tick(detection);
        let report = self.controller.apply(&commands).await;
        if report.laser_off_unconfirmed {
            // Re-logged every tick until the gate acknowledges
            error!(
                "CRITICAL: laser OFF still unconfirmed in {}",
                self.orchestrator.mode().kind()
            );
        }

        let ticks = self.orchestrator.tick_count();
        if ticks % STATUS_EVERY_TICKS == 0 {
            debug!(
                "Tick {}: {} (slot seq {}, laser {})",
                ticks,
                self.orchestrator.mode().kind(),
                self.last_sequence,
                if self.orchestrator.laser_commanded_on() {
                    "ON"
                } else {
                    "OFF"
                }
            );
        }
        StepOutcome::Continue
    }

    /// Tick at the configured period until quit or `shutdown` completes.
    pub async fn run<F>(&mut self, shutdown: F) -> LoopExit
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "Control loop running every {:?}, staleness {:?}",
            self.period, self.staleness
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => return LoopExit::Shutdown,
                _ = interval.tick() => {
                    if self.step(Instant::now()).await == StepOutcome::Quit {
                        return LoopExit::Quit;
                    }
                }
            }
        }
    }

    /// Run the teardown sequence; `stop_acquisition` runs once the laser is off.
    pub async fn shutdown<F: FnOnce()>(&mut self, stop_acquisition: F) -> TeardownReport {
        if self.orchestrator.mode().kind() != ModeKind::Paused {
            // Leave the orchestrator with outputs off before touching hardware
            self.orchestrator.pause();
        }
        let report = self.controller.teardown(stop_acquisition).await;
        if report.laser_off_confirmed {
            info!("Teardown complete: {:?}", report);
        } else {
            error!("CRITICAL: teardown finished without laser OFF confirmation");
        }
        report
    }
}
