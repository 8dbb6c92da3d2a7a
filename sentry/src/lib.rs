//! Goose sentry orchestrator.
//!
//! Tracking state machine for the laser deterrent. Each control tick feeds one
//! (possibly absent) detection through SEARCH -> TRACK -> SEARCH, with PAUSED
//! reachable from anywhere on operator request. The machine does not talk to
//! hardware; it returns [`HardwareCommand`]s that the caller applies through a
//! [`controller::HardwareController`].
//!
//! A qualifying person in view while tracking forces the laser off on the same
//! tick, before any other rule is considered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use shared::config_storage::CalibrationSession;
use shared::{CalibrationModel, ConfidenceThresholds, Detection};
use tracing::{debug, info, trace, warn};

pub mod aim;
pub mod callback;
pub mod config;
pub mod controller;
pub mod error;
pub mod state;

use crate::aim::{AimSolution, AimingTransform};
use crate::callback::{AimRejection, CallbackId, SentryCallback, TransitionReason};

// Re-export commonly used types for external use
pub use crate::callback::SentryCallbackEvent;
pub use crate::config::SentryConfig;
pub use crate::error::SentryError;
pub use crate::state::{ModeKind, SentryEvent, SentryMode};

/// Hardware action requested by the orchestrator.
///
/// The orchestrator decides what the hardware should do but does not do it.
/// The caller applies these in order.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCommand {
    /// Enable (`true`) or disable (`false`) the laser
    SetLaser(bool),
    /// Absolute stage move
    MoveAbsolute(AimSolution),
    /// Run the deterrence pattern around `center`
    StartPattern { center: AimSolution, size_mm: f64 },
    StopPattern,
}

/// What this tick's detection means after thresholds are applied
enum Sighting {
    Person(Detection),
    Bird(Detection),
    Nothing,
}

type TickResult = (SentryMode, Vec<HardwareCommand>, Option<TransitionReason>);

/// The sentry state machine
pub struct Orchestrator {
    mode: SentryMode,
    config: SentryConfig,
    thresholds: ConfidenceThresholds,
    calibration: CalibrationModel,
    aiming: AimingTransform,
    /// Software-side laser intent after the last processed event
    laser_on: bool,
    callbacks: Arc<Mutex<HashMap<CallbackId, SentryCallback>>>,
    next_callback_id: Arc<Mutex<CallbackId>>,
    tick_counter: u64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Laser off and pattern stopped, issued every tick outside TRACK
fn safe_off() -> Vec<HardwareCommand> {
    vec![HardwareCommand::SetLaser(false), HardwareCommand::StopPattern]
}

/// Move, laser on and pattern around `aim`, in that order
fn aim_commands(aim: AimSolution, size_mm: f64) -> Vec<HardwareCommand> {
    vec![
        HardwareCommand::MoveAbsolute(aim),
        HardwareCommand::SetLaser(true),
        HardwareCommand::StartPattern {
            center: aim,
            size_mm,
        },
    ]
}

impl Orchestrator {
    /// Create an orchestrator in SEARCH.
    ///
    /// The calibration model is required; there is no operational state
    /// without one.
    pub fn new(config: SentryConfig, calibration: CalibrationModel) -> Self {
        Self {
            mode: SentryMode::initial(),
            thresholds: config.confidence_thresholds(),
            aiming: AimingTransform::new(config.aim.clone()),
            config,
            calibration,
            laser_on: false,
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            next_callback_id: Arc::new(Mutex::new(0)),
            tick_counter: 0,
        }
    }

    /// Validate `config` and build the calibration model from a stored session.
    pub fn from_session(
        config: SentryConfig,
        session: &CalibrationSession,
    ) -> Result<Self, SentryError> {
        config.validate()?;
        let calibration = session.model()?;
        Ok(Self::new(config, calibration))
    }

    /// Register a callback for sentry events
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&SentryCallbackEvent) + Send + Sync + 'static,
    {
        let mut callbacks = lock(&self.callbacks);
        let mut next_id = lock(&self.next_callback_id);

        let callback_id = *next_id;
        *next_id += 1;

        callbacks.insert(callback_id, Arc::new(callback));
        callback_id
    }

    /// Deregister a callback
    pub fn deregister_callback(&self, callback_id: CallbackId) -> bool {
        lock(&self.callbacks).remove(&callback_id).is_some()
    }

    pub fn callback_count(&self) -> usize {
        lock(&self.callbacks).len()
    }

    fn emit_event(&self, event: &SentryCallbackEvent) {
        // Clone out so callbacks may re-enter the orchestrator's registry
        let callbacks: Vec<SentryCallback> = lock(&self.callbacks).values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }

    fn classify(&self, detection: Option<Detection>) -> Sighting {
        match detection {
            Some(d) if d.is_person() && self.thresholds.qualifies(&d) => Sighting::Person(d),
            Some(d) if d.is_bird() && self.thresholds.qualifies(&d) => Sighting::Bird(d),
            _ => Sighting::Nothing,
        }
    }

    /// Handle a tick while searching
    fn handle_search_tick(&mut self, confirm_frames: u32, detection: Option<Detection>) -> TickResult {
        let bird = match self.classify(detection) {
            Sighting::Bird(d) => d,
            Sighting::Person(d) => {
                trace!("Person in view while searching (conf {:.2})", d.confidence);
                return (SentryMode::Search { confirm_frames: 0 }, safe_off(), None);
            }
            Sighting::Nothing => {
                return (SentryMode::Search { confirm_frames: 0 }, safe_off(), None);
            }
        };

        let confirmed = confirm_frames + 1;
        if confirmed < self.config.thresholds.track_confirm_frames {
            debug!(
                "Bird sighting {}/{} (conf {:.2})",
                confirmed, self.config.thresholds.track_confirm_frames, bird.confidence
            );
            return (
                SentryMode::Search {
                    confirm_frames: confirmed,
                },
                safe_off(),
                None,
            );
        }

        info!("Bird confirmed after {} frames, entering TRACK", confirmed);
        // The confirming detection is also the first tracking sample
        let (mode, commands, _) = self.handle_track_tick(0, None, Some(bird));
        (mode, commands, Some(TransitionReason::BirdConfirmed))
    }

    /// Handle a tick while tracking
    fn handle_track_tick(
        &mut self,
        lost_frames: u32,
        last_distance_ft: Option<f64>,
        detection: Option<Detection>,
    ) -> TickResult {
        let sighting = self.classify(detection);

        // Person interlock pre-empts everything else this tick
        if let Sighting::Person(person) = sighting {
            warn!(
                "Person in view (conf {:.2}), laser OFF and returning to SEARCH",
                person.confidence
            );
            self.laser_on = false;
            self.emit_event(&SentryCallbackEvent::PersonInterlock {
                confidence: person.confidence,
            });
            return (
                SentryMode::initial(),
                safe_off(),
                Some(TransitionReason::PersonInView),
            );
        }

        let out_of_range = matches!(sighting, Sighting::Bird(_));
        if let Sighting::Bird(bird) = sighting {
            let row = bird.bbox.ground_contact_row();
            let distance_ft = self.calibration.query(row);
            let bounds = self.config.distance;

            if bounds.contains(distance_ft) {
                return match self.aiming.solve(distance_ft) {
                    Ok(aim) => {
                        trace!(
                            "Row {:.1} -> {:.2} ft -> X={:.3} Y={:.3}",
                            row,
                            distance_ft,
                            aim.motor_x_mm,
                            aim.motor_y_mm
                        );
                        self.laser_on = true;
                        self.emit_event(&SentryCallbackEvent::Aimed { distance_ft, aim });
                        (
                            SentryMode::Track {
                                lost_frames: 0,
                                last_distance_ft: Some(distance_ft),
                            },
                            aim_commands(aim, self.config.pattern.size_mm),
                            None,
                        )
                    }
                    Err(e) => {
                        // Target is still there; only this tick's motion is skipped
                        warn!("Aim rejected at {:.2} ft: {}", distance_ft, e);
                        self.emit_event(&SentryCallbackEvent::AimRejected {
                            distance_ft,
                            reason: AimRejection::Aim(e),
                        });
                        (
                            SentryMode::Track {
                                lost_frames: 0,
                                last_distance_ft: Some(distance_ft),
                            },
                            vec![],
                            None,
                        )
                    }
                };
            }

            debug!(
                "Distance {:.2} ft outside {:.1}..{:.1}, counting as lost",
                distance_ft, bounds.min_ft, bounds.max_ft
            );
            self.emit_event(&SentryCallbackEvent::AimRejected {
                distance_ft,
                reason: AimRejection::DistanceOutOfRange {
                    min_ft: bounds.min_ft,
                    max_ft: bounds.max_ft,
                },
            });
        }

        let lost = lost_frames + 1;
        if lost >= self.config.thresholds.lost_frames_to_exit {
            info!("Target lost for {} frames, returning to SEARCH", lost);
            self.laser_on = false;
            return (
                SentryMode::initial(),
                safe_off(),
                Some(TransitionReason::TargetLost),
            );
        }

        let mode = SentryMode::Track {
            lost_frames: lost,
            last_distance_ft,
        };
        // An out-of-range bird never produces motion or laser ON
        if out_of_range {
            return (mode, vec![], None);
        }

        // Hold on the last valid distance; re-asserting it lets a move or
        // laser ON that failed earlier go through
        match last_distance_ft.map(|d| self.aiming.solve(d)) {
            Some(Ok(aim)) => {
                self.laser_on = true;
                (mode, aim_commands(aim, self.config.pattern.size_mm), None)
            }
            _ => (mode, vec![], None),
        }
    }

    /// Process an event and transition states.
    ///
    /// Returns the hardware commands the caller must apply, in order. The mode
    /// change is recorded regardless of whether those commands later succeed.
    pub fn process_event(&mut self, event: SentryEvent) -> Vec<HardwareCommand> {
        use SentryMode::*;

        let previous = self.mode.kind();

        let (new_mode, commands, reason) = match (self.mode, event) {
            (Paused, SentryEvent::Pause) => (Paused, safe_off(), None),
            (_, SentryEvent::Pause) => {
                info!("Operator pause from {}", previous);
                (Paused, safe_off(), Some(TransitionReason::OperatorPause))
            }

            (Paused, SentryEvent::Resume) => {
                info!("Operator resume, entering SEARCH");
                (
                    SentryMode::initial(),
                    safe_off(),
                    Some(TransitionReason::OperatorResume),
                )
            }
            // Detections are ignored while paused; outputs stay forced off
            (Paused, SentryEvent::Tick(_)) => (Paused, safe_off(), None),

            (Search { confirm_frames }, SentryEvent::Tick(detection)) => {
                self.handle_search_tick(confirm_frames, detection)
            }
            (
                Track {
                    lost_frames,
                    last_distance_ft,
                },
                SentryEvent::Tick(detection),
            ) => self.handle_track_tick(lost_frames, last_distance_ft, detection),

            (mode, SentryEvent::Resume) => {
                debug!("Resume ignored in {}", mode.kind());
                (mode, vec![], None)
            }
        };

        if matches!(event, SentryEvent::Tick(_)) {
            self.tick_counter += 1;
        }
        if new_mode.kind() != ModeKind::Track {
            self.laser_on = false;
        }
        self.mode = new_mode;

        if let Some(reason) = reason {
            self.emit_event(&SentryCallbackEvent::ModeChanged {
                from: previous,
                to: new_mode.kind(),
                reason,
            });
        }

        commands
    }

    /// Process one control tick
    pub fn tick(&mut self, detection: Option<Detection>) -> Vec<HardwareCommand> {
        self.process_event(SentryEvent::Tick(detection))
    }

    pub fn pause(&mut self) -> Vec<HardwareCommand> {
        self.process_event(SentryEvent::Pause)
    }

    pub fn resume(&mut self) -> Vec<HardwareCommand> {
        self.process_event(SentryEvent::Resume)
    }

    /// Swap in a new calibration.
    ///
    /// Any active track was estimated with the old model, so tracking restarts
    /// from SEARCH. Returns the commands for leaving TRACK, if it was active.
    pub fn replace_calibration(&mut self, calibration: CalibrationModel) -> Vec<HardwareCommand> {
        self.calibration = calibration;
        info!(
            "Calibration replaced ({} samples, rows {:?})",
            self.calibration.samples().len(),
            self.calibration.pixel_range()
        );

        match self.mode {
            SentryMode::Track { .. } => {
                self.laser_on = false;
                self.mode = SentryMode::initial();
                self.emit_event(&SentryCallbackEvent::ModeChanged {
                    from: ModeKind::Track,
                    to: ModeKind::Search,
                    reason: TransitionReason::CalibrationReplaced,
                });
                safe_off()
            }
            SentryMode::Search { .. } => {
                self.mode = SentryMode::initial();
                vec![]
            }
            SentryMode::Paused => vec![],
        }
    }

    /// Get the current mode
    pub fn mode(&self) -> &SentryMode {
        &self.mode
    }

    /// Whether the last processed event left the laser commanded on
    pub fn laser_commanded_on(&self) -> bool {
        self.laser_on
    }

    pub fn config(&self) -> &SentryConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationModel {
        &self.calibration
    }

    pub fn aiming(&self) -> &AimingTransform {
        &self.aiming
    }

    /// Control ticks processed so far
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }
}
