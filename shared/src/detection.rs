//! Classified detections and the per-tick selection rule.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Object classes the classifier reports that the sentry cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionClass {
    Bird,
    Person,
}

impl std::fmt::Display for DetectionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionClass::Bird => write!(f, "bird"),
            DetectionClass::Person => write!(f, "person"),
        }
    }
}

/// Axis-aligned bounding box in image pixels, `(x1, y1)` top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Row where the object meets the ground (bottom edge).
    pub fn ground_contact_row(&self) -> f64 {
        self.y1.max(self.y2)
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// A single classified object observed in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class: DetectionClass,
    pub bbox: BoundingBox,
    pub confidence: f64,
    /// Monotonic capture time of the frame this came from
    pub captured_at: Instant,
}

impl Detection {
    pub fn new(class: DetectionClass, bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            class,
            bbox,
            confidence,
            captured_at: Instant::now(),
        }
    }

    pub fn with_captured_at(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Time elapsed since capture as seen from `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }

    /// True once the detection is older than `threshold`.
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        self.age(now) > threshold
    }

    pub fn is_bird(&self) -> bool {
        self.class == DetectionClass::Bird
    }

    pub fn is_person(&self) -> bool {
        self.class == DetectionClass::Person
    }
}

/// Per-class minimum confidences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub bird: f64,
    pub person: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            bird: 0.25,
            person: 0.40,
        }
    }
}

impl ConfidenceThresholds {
    pub fn for_class(&self, class: DetectionClass) -> f64 {
        match class {
            DetectionClass::Bird => self.bird,
            DetectionClass::Person => self.person,
        }
    }

    /// Whether `detection` meets its class threshold.
    pub fn qualifies(&self, detection: &Detection) -> bool {
        detection.confidence >= self.for_class(detection.class)
    }
}

/// Pick the one detection a tick acts on.
///
/// Any qualifying person wins outright, whatever its confidence relative to
/// birds in the same frame. Otherwise the highest-confidence qualifying bird
/// is returned. Non-qualifying candidates are never selected.
pub fn select_detection(
    candidates: &[Detection],
    thresholds: &ConfidenceThresholds,
) -> Option<Detection> {
    let best_of = |class: DetectionClass| {
        candidates
            .iter()
            .filter(|d| d.class == class && thresholds.qualifies(d))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .copied()
    };

    best_of(DetectionClass::Person).or_else(|| best_of(DetectionClass::Bird))
}
