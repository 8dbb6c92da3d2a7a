//! Numerical helpers used by the calibration model.

pub mod interpolation;

pub use interpolation::{InterpolationError, PiecewiseLinear};
