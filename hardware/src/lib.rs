//! Hardware gateways for the goose sentry.
//!
//! Two independent command sinks sit behind traits so the control logic can be
//! exercised without devices:
//!
//! - [`LaserGate`]: binary enable/disable of the laser driver (ESP32 over HTTP).
//! - [`MotionStreamer`]: absolute X/Y moves and the repeating deterrence
//!   pattern on a Klipper stage reached through Moonraker's WebSocket API.
//!
//! Both gateways bound every request with a timeout and a retry count through
//! [`retry::retry_bounded`].

pub mod errors;
pub mod laser;
pub mod mock;
pub mod moonraker;
pub mod motion;
pub mod retry;

pub use errors::GatewayError;
pub use laser::{HttpLaserGate, LaserAck, LaserGate};
pub use moonraker::MoonrakerClient;
pub use motion::{
    MotionAck, MotionSettings, MotionStreamer, MoonrakerMotion, MotorPosition, TravelEnvelope,
};
pub use retry::{retry_bounded, RetryPolicy};
