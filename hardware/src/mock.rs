//! In-memory gateways for tests.
//!
//! Both mocks are cheap to clone; clones share state, so a test can hand one
//! to the code under test and inspect the other.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::laser::{LaserAck, LaserGate};
use crate::motion::{MotionAck, MotionStreamer, MotorPosition};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct LaserState {
    requests: Vec<bool>,
    physical: Option<bool>,
    fail_next: u32,
    failing: bool,
    delay: Duration,
}

/// Laser gate that records every request and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct MockLaser {
    state: Arc<Mutex<LaserState>>,
}

impl MockLaser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `set` request received, in order, including failed ones.
    pub fn requests(&self) -> Vec<bool> {
        lock(&self.state).requests.clone()
    }

    /// Last acknowledged state; `None` before any successful request.
    pub fn is_on(&self) -> Option<bool> {
        lock(&self.state).physical
    }

    /// Fail the next `n` requests.
    pub fn fail_next(&self, n: u32) {
        lock(&self.state).fail_next = n;
    }

    /// Fail every request until cleared.
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Delay each request, for exercising deadlines.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.state).delay = delay;
    }

    pub fn clear_requests(&self) {
        lock(&self.state).requests.clear();
    }
}

#[async_trait]
impl LaserGate for MockLaser {
    async fn set(&mut self, on: bool) -> Result<LaserAck, GatewayError> {
        let delay = {
            let mut s = lock(&self.state);
            s.requests.push(on);
            s.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut s = lock(&self.state);
        if s.failing {
            return Err(GatewayError::failure(laser_op(on), "injected failure"));
        }
        if s.fail_next > 0 {
            s.fail_next -= 1;
            return Err(GatewayError::timeout(laser_op(on)));
        }
        s.physical = Some(on);
        Ok(LaserAck::Confirmed)
    }
}

fn laser_op(on: bool) -> &'static str {
    if on {
        "laser on"
    } else {
        "laser off"
    }
}

/// Command as seen by the mock motion endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionCall {
    Home,
    Move(MotorPosition),
    StartPattern { center: MotorPosition, size_mm: f64 },
    StopPattern,
    Close,
}

#[derive(Debug, Default)]
struct MotionState {
    calls: Vec<MotionCall>,
    pattern: Option<(MotorPosition, f64)>,
    failing: bool,
    closed: bool,
    delay: Duration,
}

/// Motion streamer that records commands that reach the endpoint.
///
/// Pattern start/stop follow the same idempotence as the real streamer:
/// repeating the current state records nothing.
#[derive(Debug, Clone, Default)]
pub struct MockMotion {
    state: Arc<Mutex<MotionState>>,
}

impl MockMotion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MotionCall> {
        lock(&self.state).calls.clone()
    }

    pub fn moves(&self) -> Vec<MotorPosition> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                MotionCall::Move(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Delay each move and pattern request, for exercising time budgets.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.state).delay = delay;
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    async fn stall(&self) {
        let delay = lock(&self.state).delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }
}

#[async_trait]
impl MotionStreamer for MockMotion {
    async fn home(&mut self) -> Result<(), GatewayError> {
        let mut s = lock(&self.state);
        if s.failing {
            return Err(GatewayError::failure("home", "injected failure"));
        }
        s.calls.push(MotionCall::Home);
        s.pattern = None;
        Ok(())
    }

    async fn move_absolute(&mut self, target: MotorPosition) -> Result<MotionAck, GatewayError> {
        self.stall().await;
        let mut s = lock(&self.state);
        if s.failing {
            return Err(GatewayError::timeout("move"));
        }
        s.calls.push(MotionCall::Move(target));
        Ok(MotionAck::Moved)
    }

    async fn start_pattern(
        &mut self,
        center: MotorPosition,
        size_mm: f64,
    ) -> Result<(), GatewayError> {
        self.stall().await;
        let mut s = lock(&self.state);
        if s.pattern == Some((center, size_mm)) {
            return Ok(());
        }
        if s.failing {
            return Err(GatewayError::timeout("pattern start"));
        }
        s.calls.push(MotionCall::StartPattern { center, size_mm });
        s.pattern = Some((center, size_mm));
        Ok(())
    }

    async fn stop_pattern(&mut self) -> Result<(), GatewayError> {
        self.stall().await;
        let mut s = lock(&self.state);
        if s.pattern.is_none() {
            return Ok(());
        }
        if s.failing {
            return Err(GatewayError::timeout("pattern stop"));
        }
        s.calls.push(MotionCall::StopPattern);
        s.pattern = None;
        Ok(())
    }

    fn pattern_running(&self) -> bool {
        lock(&self.state).pattern.is_some()
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        let mut s = lock(&self.state);
        if !s.closed {
            s.calls.push(MotionCall::Close);
            s.closed = true;
        }
        Ok(())
    }
}
