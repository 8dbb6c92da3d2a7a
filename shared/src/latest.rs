//! Single-slot "most recent wins" hand-off between acquisition and control.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::detection::Detection;

/// Snapshot of the slot at read time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotSnapshot {
    /// Current slot contents, `None` if the last frame had no qualifying object
    pub detection: Option<Detection>,
    /// Number of publishes so far; unchanged between reads means no new frame
    pub sequence: u64,
}

/// Shared slot holding the latest selected detection.
///
/// The producer overwrites whatever is there; there is no queue. Readers take
/// a copy under a short lock, so a half-written value is never observed.
#[derive(Debug, Default)]
pub struct LatestDetection {
    slot: Mutex<Option<Detection>>,
    sequence: AtomicU64,
}

impl LatestDetection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Detection>> {
        // A poisoned slot still holds a complete value
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the slot contents with this frame's selection.
    pub fn publish(&self, detection: Option<Detection>) {
        let mut slot = self.lock();
        *slot = detection;
        self.sequence.fetch_add(1, Ordering::Release);
    }

    /// Copy of the current contents without waiting for a new frame.
    pub fn snapshot(&self) -> SlotSnapshot {
        let slot = self.lock();
        SlotSnapshot {
            detection: *slot,
            sequence: self.sequence.load(Ordering::Acquire),
        }
    }

    pub fn clear(&self) {
        self.publish(None);
    }
}
