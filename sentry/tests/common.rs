//! Common utilities for sentry tests

#![allow(dead_code)]

use sentry::{ModeKind, Orchestrator, SentryConfig};
use shared::{BoundingBox, CalibrationModel, CalibrationSample, Detection, DetectionClass};

/// Row whose ground contact calibrates to 10 ft
pub const ROW_10_FT: f64 = 450.0;
/// Row whose ground contact calibrates to 7.5 ft
pub const ROW_7_5_FT: f64 = 525.0;
/// Row whose ground contact calibrates to 35 ft, beyond the default 30 ft bound
pub const ROW_35_FT: f64 = 187.5;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// Lawn calibration containing the (600, 5), (450, 10), (300, 20) reference points
pub fn scenario_calibration() -> CalibrationModel {
    CalibrationModel::build(&[
        CalibrationSample::new(700, 3.0),
        CalibrationSample::new(650, 4.0),
        CalibrationSample::new(600, 5.0),
        CalibrationSample::new(450, 10.0),
        CalibrationSample::new(300, 20.0),
        CalibrationSample::new(150, 40.0),
    ])
    .unwrap()
}

pub fn bird_at_row(row: f64, confidence: f64) -> Detection {
    Detection::new(
        DetectionClass::Bird,
        BoundingBox::new(300.0, row - 35.0, 360.0, row),
        confidence,
    )
}

pub fn bird(confidence: f64) -> Detection {
    bird_at_row(ROW_10_FT, confidence)
}

pub fn person(confidence: f64) -> Detection {
    Detection::new(
        DetectionClass::Person,
        BoundingBox::new(500.0, 100.0, 600.0, 500.0),
        confidence,
    )
}

pub fn orchestrator() -> Orchestrator {
    Orchestrator::new(SentryConfig::default(), scenario_calibration())
}

/// Orchestrator already in TRACK with the laser commanded on
pub fn tracking_orchestrator() -> Orchestrator {
    let mut orch = orchestrator();
    for _ in 0..3 {
        orch.tick(Some(bird(0.9)));
    }
    assert_eq!(orch.mode().kind(), ModeKind::Track);
    assert!(orch.laser_commanded_on());
    orch
}
