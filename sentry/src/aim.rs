//! Ground distance to absolute stage position.
//!
//! The beam leaves the mount at height `H` and must hit the ground at distance
//! `D`, so it is depressed by `θ = atan2(H, D)` below level. The Y stepper tilts
//! a mirror; a mirror deflects the beam by twice its own rotation, so with
//! `mirror_half_angle` the stage turns `θ / 2`. Lateral aim is held at neutral.

use std::fmt;

use hardware::MotorPosition;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AimSettings;

const METERS_PER_FOOT: f64 = 0.3048;

/// Absolute stage coordinates for one tracking tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AimSolution {
    pub motor_x_mm: f64,
    pub motor_y_mm: f64,
}

impl AimSolution {
    pub fn position(&self) -> MotorPosition {
        MotorPosition::new(self.motor_x_mm, self.motor_y_mm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AimError {
    /// The solution falls outside mechanical travel. Never clamped.
    #[error("{axis} position {value:.3}mm outside travel {min:.3}..{max:.3}")]
    OutOfEnvelope {
        axis: Axis,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("distance {0} ft cannot be aimed at")]
    InvalidDistance(f64),
}

/// Beam depression below horizontal, in degrees.
pub fn depression_angle_deg(height_m: f64, distance_ft: f64) -> f64 {
    height_m.atan2(distance_ft * METERS_PER_FOOT).to_degrees()
}

/// Stateless distance-to-position transform.
#[derive(Debug, Clone, PartialEq)]
pub struct AimingTransform {
    settings: AimSettings,
}

impl AimingTransform {
    pub fn new(settings: AimSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AimSettings {
        &self.settings
    }

    /// Solve for the stage position that puts the beam on the ground at
    /// `distance_ft`.
    pub fn solve(&self, distance_ft: f64) -> Result<AimSolution, AimError> {
        if !distance_ft.is_finite() || distance_ft <= 0.0 {
            return Err(AimError::InvalidDistance(distance_ft));
        }

        let s = &self.settings;
        let theta = depression_angle_deg(s.laser_height_m, distance_ft);
        let mirror_deg = if s.mirror_half_angle {
            theta / 2.0
        } else {
            theta
        };

        let solution = AimSolution {
            motor_x_mm: s.neutral.x_mm,
            motor_y_mm: s.neutral.y_mm + s.y_sign * mirror_deg * s.y_mm_per_degree,
        };

        let e = &s.envelope;
        check_axis(Axis::X, solution.motor_x_mm, e.x_min, e.x_max)?;
        check_axis(Axis::Y, solution.motor_y_mm, e.y_min, e.y_max)?;
        Ok(solution)
    }
}

fn check_axis(axis: Axis, value: f64, min: f64, max: f64) -> Result<(), AimError> {
    if value < min || value > max || value.is_nan() {
        return Err(AimError::OutOfEnvelope {
            axis,
            value,
            min,
            max,
        });
    }
    Ok(())
}
