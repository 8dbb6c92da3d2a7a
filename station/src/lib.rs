//! Goose sentry station runtime.
//!
//! Glue between the orchestrator and the outside world: the detection intake
//! thread, operator console, fixed-rate control loop, runtime settings and
//! calibration file import. The binaries in `src/bin` wire these together.

pub mod acquisition;
pub mod calibration_import;
pub mod control_loop;
pub mod operator;
pub mod settings;

pub use control_loop::{ControlLoop, LoopExit};
pub use operator::OperatorCommand;
pub use settings::{SettingsArgs, StationSettings};

/// Install the `tracing` subscriber used by the station binaries.
///
/// `RUST_LOG` takes precedence over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
