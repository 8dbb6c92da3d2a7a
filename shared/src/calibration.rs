//! Pixel-row to ground-distance calibration.
//!
//! An operator collects `(pixel_y, distance_ft)` pairs by placing markers at
//! known distances and clicking their ground contact in the camera view. The
//! resulting set is validated once and turned into a [`CalibrationModel`] that
//! answers distance queries by piecewise-linear interpolation.
//!
//! A model is either fully valid or does not exist. Sets that are too small,
//! contain repeated pixel rows, or do not move in a single direction are
//! rejected outright; nothing is reordered away or dropped to make them fit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algo::interpolation::{InterpolationError, PiecewiseLinear};

/// Minimum number of samples a calibration must contain.
pub const MIN_CALIBRATION_SAMPLES: usize = 6;

/// One operator-collected calibration point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Image row of the marker's ground contact (0 = top of frame)
    pub pixel_y: u32,
    /// Measured ground distance from the laser mount in feet
    pub distance_ft: f64,
}

impl CalibrationSample {
    pub fn new(pixel_y: u32, distance_ft: f64) -> Self {
        Self {
            pixel_y,
            distance_ft,
        }
    }
}

/// Reasons a calibration set is rejected.
#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("calibration needs at least {required} samples, got {found}")]
    InsufficientSamples { found: usize, required: usize },

    /// Sorted by pixel row, distances change direction at `index`
    #[error("calibration distances are not strictly monotonic (at sorted index {index})")]
    NonMonotonic { index: usize },

    #[error("invalid distance {distance_ft} ft at pixel row {pixel_y}")]
    InvalidDistance { pixel_y: u32, distance_ft: f64 },

    #[error("pixel row {pixel_y} appears more than once")]
    DuplicatePixelRow { pixel_y: u32 },

    #[error("interpolant construction failed: {0}")]
    Interpolation(#[from] InterpolationError),
}

/// How distance changes as the pixel row grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Increasing,
    Decreasing,
}

/// Validated calibration with its fitted interpolant.
///
/// Immutable after construction. Re-calibration builds a new model and swaps
/// it in wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationModel {
    samples: Vec<CalibrationSample>,
    direction: Direction,
    interpolant: PiecewiseLinear,
}

impl CalibrationModel {
    /// Validate `samples` and fit the interpolant.
    ///
    /// Samples may arrive in any order; the model keeps them sorted by pixel row.
    pub fn build(samples: &[CalibrationSample]) -> Result<Self, CalibrationError> {
        if samples.len() < MIN_CALIBRATION_SAMPLES {
            return Err(CalibrationError::InsufficientSamples {
                found: samples.len(),
                required: MIN_CALIBRATION_SAMPLES,
            });
        }

        if let Some(bad) = samples
            .iter()
            .find(|s| !s.distance_ft.is_finite() || s.distance_ft <= 0.0)
        {
            return Err(CalibrationError::InvalidDistance {
                pixel_y: bad.pixel_y,
                distance_ft: bad.distance_ft,
            });
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by_key(|s| s.pixel_y);

        if let Some(pair) = sorted.windows(2).find(|w| w[0].pixel_y == w[1].pixel_y) {
            return Err(CalibrationError::DuplicatePixelRow {
                pixel_y: pair[0].pixel_y,
            });
        }

        let direction = if sorted[1].distance_ft > sorted[0].distance_ft {
            Direction::Increasing
        } else if sorted[1].distance_ft < sorted[0].distance_ft {
            Direction::Decreasing
        } else {
            return Err(CalibrationError::NonMonotonic { index: 1 });
        };

        for (i, w) in sorted.windows(2).enumerate() {
            let ok = match direction {
                Direction::Increasing => w[1].distance_ft > w[0].distance_ft,
                Direction::Decreasing => w[1].distance_ft < w[0].distance_ft,
            };
            if !ok {
                return Err(CalibrationError::NonMonotonic { index: i + 1 });
            }
        }

        let interpolant = PiecewiseLinear::new(
            sorted.iter().map(|s| f64::from(s.pixel_y)).collect(),
            sorted.iter().map(|s| s.distance_ft).collect(),
        )?;

        Ok(Self {
            samples: sorted,
            direction,
            interpolant,
        })
    }

    /// Ground distance in feet for an image row.
    ///
    /// Rows outside the sampled range return the nearest boundary sample's
    /// distance. A NaN row has no distance and returns NaN.
    pub fn query(&self, pixel_y: f64) -> f64 {
        self.interpolant.eval(pixel_y)
    }

    /// Samples sorted by pixel row.
    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    /// Sampled pixel rows as `(min, max)`.
    pub fn pixel_range(&self) -> (u32, u32) {
        (
            self.samples[0].pixel_y,
            self.samples[self.samples.len() - 1].pixel_y,
        )
    }

    /// Sampled distances as `(min, max)` in feet.
    pub fn distance_range(&self) -> (f64, f64) {
        let first = self.samples[0].distance_ft;
        let last = self.samples[self.samples.len() - 1].distance_ft;
        (first.min(last), first.max(last))
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}
