//! Shared components for the goose-sentry workspace.
//!
//! This crate holds the leaf types that every other crate depends on:
//! classified detections and the per-frame selection rule, the single-slot
//! latest-detection handoff, the pixel-row to distance calibration model,
//! and on-disk storage of calibration sessions.

pub mod algo;
pub mod calibration;
pub mod config_storage;
pub mod detection;
pub mod detection_source;
pub mod latest;

pub use calibration::{CalibrationError, CalibrationModel, CalibrationSample};
pub use detection::{BoundingBox, ConfidenceThresholds, Detection, DetectionClass};
pub use latest::LatestDetection;
