//! Piecewise-linear interpolation over a sorted set of knots.
//!
//! The interpolant is evaluated by locating the two knots that bracket the
//! query and blending their values linearly. Queries outside the knot range
//! clamp to the nearest boundary value; nothing is extrapolated.
//!
//! # Example
//!
//! ```
//! use shared::algo::interpolation::PiecewiseLinear;
//!
//! let table = PiecewiseLinear::new(vec![0.0, 10.0, 20.0], vec![0.0, 5.0, 20.0]).unwrap();
//!
//! assert_eq!(table.eval(5.0), 2.5);
//! assert_eq!(table.eval(15.0), 12.5);
//! assert_eq!(table.eval(-3.0), 0.0);
//! assert_eq!(table.eval(99.0), 20.0);
//! ```

use thiserror::Error;

/// Error type for interpolant construction
#[derive(Debug, Error, PartialEq)]
pub enum InterpolationError {
    /// Knot and value arrays differ in length
    #[error("knot count {knots} does not match value count {values}")]
    LengthMismatch { knots: usize, values: usize },

    /// Fewer than two knots were supplied
    #[error("need at least 2 knots, got {0}")]
    TooFewKnots(usize),

    /// Knots are not strictly increasing
    #[error("knots must be strictly increasing (violated at index {index})")]
    NotIncreasing { index: usize },

    /// A knot or value is NaN or infinite
    #[error("non-finite entry at index {index}")]
    NonFinite { index: usize },
}

/// Linear interpolant through `(x, y)` knots with clamped ends.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseLinear {
    /// Strictly increasing knot positions
    xs: Vec<f64>,
    /// Value at each knot
    ys: Vec<f64>,
}

impl PiecewiseLinear {
    /// Build an interpolant from knot positions and their values.
    ///
    /// `xs` must be strictly increasing and every entry must be finite.
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self, InterpolationError> {
        if xs.len() != ys.len() {
            return Err(InterpolationError::LengthMismatch {
                knots: xs.len(),
                values: ys.len(),
            });
        }
        if xs.len() < 2 {
            return Err(InterpolationError::TooFewKnots(xs.len()));
        }
        for (index, (x, y)) in xs.iter().zip(&ys).enumerate() {
            if !x.is_finite() || !y.is_finite() {
                return Err(InterpolationError::NonFinite { index });
            }
        }
        if let Some(index) = xs.windows(2).position(|w| w[1] <= w[0]) {
            return Err(InterpolationError::NotIncreasing { index: index + 1 });
        }

        Ok(Self { xs, ys })
    }

    /// Evaluate the interpolant at `x`.
    ///
    /// Exact knot positions return the knot value unchanged. Positions below the
    /// first knot or above the last knot return the respective boundary value.
    /// NaN evaluates to NaN.
    pub fn eval(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        let last = self.xs.len() - 1;
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[last] {
            return self.ys[last];
        }

        // First knot strictly greater than x; guaranteed in 1..=last here
        let upper = self.xs.partition_point(|&k| k <= x);
        let lower = upper - 1;

        if self.xs[lower] == x {
            return self.ys[lower];
        }

        let (x0, x1) = (self.xs[lower], self.xs[upper]);
        let (y0, y1) = (self.ys[lower], self.ys[upper]);
        let t = (x - x0) / (x1 - x0);
        y0 + t * (y1 - y0)
    }

    /// Knot domain as `(min, max)`.
    pub fn domain(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    /// Number of knots.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// Always false; an interpolant holds at least two knots.
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Check if a value is within the knot domain.
    pub fn contains(&self, x: f64) -> bool {
        let (min, max) = self.domain();
        x >= min && x <= max
    }
}
