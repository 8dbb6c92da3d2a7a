use super::{DetectionSource, SourceResult};
use crate::detection::Detection;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Replays a fixed list of frames, then ends the stream.
pub struct ScriptedSource {
    frames: VecDeque<Vec<Detection>>,
    frame_interval: Duration,
    frames_served: usize,
    repeat_last: bool,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames.into(),
            frame_interval: Duration::ZERO,
            frames_served: 0,
            repeat_last: false,
        }
    }

    /// Sleep this long before returning each frame.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Keep serving the final frame forever instead of ending.
    pub fn repeating_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub fn frames_served(&self) -> usize {
        self.frames_served
    }
}

impl DetectionSource for ScriptedSource {
    fn next_frame(&mut self) -> SourceResult<Option<Vec<Detection>>> {
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }

        let frame = if self.repeat_last && self.frames.len() == 1 {
            self.frames.front().cloned()
        } else {
            self.frames.pop_front()
        };

        // Stamp with the delivery time like a live camera would
        let now = Instant::now();
        Ok(frame.map(|f| {
            self.frames_served += 1;
            f.into_iter().map(|d| d.with_captured_at(now)).collect()
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
