use thiserror::Error;

use hardware::GatewayError;
use shared::config_storage::StorageError;
use shared::CalibrationError;

use crate::aim::AimError;
use crate::config::ConfigError;

/// Errors surfaced by sentry setup and runtime glue.
///
/// The per-tick state machine itself never fails; these come from loading
/// configuration and calibration, and from gateway setup.
#[derive(Error, Debug)]
pub enum SentryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("calibration rejected: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("calibration storage: {0}")]
    Storage(#[from] StorageError),

    #[error("aiming: {0}")]
    Aim(#[from] AimError),

    #[error("hardware: {0}")]
    Gateway(#[from] GatewayError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
