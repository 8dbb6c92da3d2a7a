//! Common utilities for station tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use hardware::mock::{MockLaser, MockMotion};
use sentry::controller::HardwareController;
use sentry::{Orchestrator, SentryConfig};
use shared::config_storage::{CalibrationSession, CalibrationStore};
use shared::{BoundingBox, CalibrationModel, CalibrationSample, Detection, DetectionClass, LatestDetection};
use station::{ControlLoop, OperatorCommand};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedSender;

pub const STALENESS: Duration = Duration::from_millis(250);

pub fn lawn_samples() -> Vec<CalibrationSample> {
    vec![
        CalibrationSample::new(700, 3.0),
        CalibrationSample::new(650, 4.0),
        CalibrationSample::new(600, 5.0),
        CalibrationSample::new(450, 10.0),
        CalibrationSample::new(300, 20.0),
        CalibrationSample::new(200, 28.0),
    ]
}

/// Same rows, everything twice as far
pub fn far_samples() -> Vec<CalibrationSample> {
    lawn_samples()
        .into_iter()
        .map(|s| CalibrationSample::new(s.pixel_y, s.distance_ft * 2.0))
        .collect()
}

pub fn bird() -> Detection {
    Detection::new(
        DetectionClass::Bird,
        BoundingBox::new(300.0, 410.0, 360.0, 450.0),
        0.9,
    )
}

pub fn person() -> Detection {
    Detection::new(
        DetectionClass::Person,
        BoundingBox::new(500.0, 100.0, 600.0, 500.0),
        0.9,
    )
}

pub struct Harness {
    pub control: ControlLoop<MockLaser, MockMotion>,
    pub laser: MockLaser,
    pub motion: MockMotion,
    pub slot: Arc<LatestDetection>,
    pub operator: UnboundedSender<OperatorCommand>,
    pub store_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_period(Duration::from_millis(50))
    }

    pub fn with_period(period: Duration) -> Self {
        let store_dir = TempDir::new().unwrap();
        let store = CalibrationStore::with_path(store_dir.path().to_path_buf());
        store
            .save_session(&CalibrationSession::new("lawn", lawn_samples()))
            .unwrap();
        store
            .save_session(&CalibrationSession::new("far", far_samples()))
            .unwrap();

        let model = CalibrationModel::build(&lawn_samples()).unwrap();
        let orchestrator = Orchestrator::new(SentryConfig::default(), model);

        let laser = MockLaser::new();
        let motion = MockMotion::new();
        let controller = HardwareController::new(laser.clone(), motion.clone(), Duration::from_millis(300))
            .with_laser_retry_interval(Duration::from_millis(20))
            .with_command_budget(period);

        let slot = Arc::new(LatestDetection::new());
        let (operator, operator_rx) = tokio::sync::mpsc::unbounded_channel();
        let control = ControlLoop::new(
            orchestrator,
            controller,
            slot.clone(),
            store,
            operator_rx,
            period,
            STALENESS,
        );

        Self {
            control,
            laser,
            motion,
            slot,
            operator,
            store_dir,
        }
    }

    /// Publish `detection` stamped now, then run one tick
    pub async fn tick_with(&mut self, detection: Option<Detection>) {
        let now = Instant::now();
        self.slot
            .publish(detection.map(|d| d.with_captured_at(now)));
        self.control.step(now).await;
    }

    /// Drive the loop into TRACK with three fresh birds
    pub async fn track(&mut self) {
        for _ in 0..3 {
            self.tick_with(Some(bird())).await;
        }
    }
}
