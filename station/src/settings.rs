//! Station runtime settings.
//!
//! Settings come from an optional JSON file and are then overridden by any
//! command-line arguments given. The nested [`SentryConfig`] carries the
//! tracking, aiming and gateway parameters.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use sentry::config::ConfigError;
use sentry::SentryConfig;
use serde::{Deserialize, Serialize};
use shared::config_storage::CalibrationStore;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error(transparent)]
    Sentry(#[from] ConfigError),
}

/// Everything the `goose_sentry` binary needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationSettings {
    /// Laser driver base URL, e.g. `http://192.168.4.1`
    pub laser_url: String,
    /// Moonraker WebSocket URL
    pub moonraker_url: String,
    /// Address the classifier connects to with newline-delimited JSON frames
    pub detection_listen: String,
    pub control_rate_hz: f64,
    /// Detections older than this are treated as absent
    pub staleness_ms: u64,
    /// Calibration store root; `~/.goose_sentry` when unset
    pub storage_root: Option<PathBuf>,
    /// Session to load at startup; the most recent one when unset
    pub calibration_session: Option<String>,
    pub sentry: SentryConfig,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            laser_url: "http://192.168.4.1".to_string(),
            moonraker_url: "ws://localhost:7125/websocket".to_string(),
            detection_listen: "127.0.0.1:7300".to_string(),
            control_rate_hz: 20.0,
            staleness_ms: 250,
            storage_root: None,
            calibration_session: None,
            sentry: SentryConfig::default(),
        }
    }
}

impl StationSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(self.control_rate_hz.is_finite() && self.control_rate_hz > 0.0) {
            return Err(SettingsError::Invalid(format!(
                "control rate must be positive, got {}",
                self.control_rate_hz
            )));
        }
        if self.control_rate_hz > 200.0 {
            return Err(SettingsError::Invalid(format!(
                "control rate {} Hz is faster than the gateways can follow",
                self.control_rate_hz
            )));
        }
        if self.staleness_ms == 0 {
            return Err(SettingsError::Invalid(
                "staleness threshold must be non-zero".to_string(),
            ));
        }
        if !(self.laser_url.starts_with("http://") || self.laser_url.starts_with("https://")) {
            return Err(SettingsError::Invalid(format!(
                "laser URL must be http(s): {}",
                self.laser_url
            )));
        }
        if !(self.moonraker_url.starts_with("ws://") || self.moonraker_url.starts_with("wss://")) {
            return Err(SettingsError::Invalid(format!(
                "Moonraker URL must be ws(s): {}",
                self.moonraker_url
            )));
        }
        self.detection_addr()?;
        self.sentry.validate()?;
        Ok(())
    }

    pub fn detection_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.detection_listen.parse().map_err(|e| {
            SettingsError::Invalid(format!(
                "bad detection listen address {}: {}",
                self.detection_listen, e
            ))
        })
    }

    pub fn control_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.control_rate_hz)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }

    pub fn store(&self) -> std::io::Result<CalibrationStore> {
        match &self.storage_root {
            Some(root) => Ok(CalibrationStore::with_path(root.clone())),
            None => CalibrationStore::new(),
        }
    }
}

/// Command-line overrides shared by the station binaries.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    #[arg(
        long,
        short = 'c',
        help = "JSON settings file",
        long_help = "JSON file with station settings. Any field may be omitted; omitted \
            fields take their defaults. Command-line options below override the file.",
        value_name = "PATH"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Laser driver base URL", value_name = "URL")]
    pub laser_url: Option<String>,

    #[arg(long, help = "Moonraker WebSocket URL", value_name = "URL")]
    pub moonraker_url: Option<String>,

    #[arg(
        long,
        help = "Listen address for the classifier's detection stream",
        value_name = "ADDR"
    )]
    pub detection_listen: Option<String>,

    #[arg(long, help = "Control loop rate in Hz")]
    pub rate_hz: Option<f64>,

    #[arg(
        long,
        help = "Maximum detection age in milliseconds",
        long_help = "Detections older than this when a control tick reads them are treated \
            as if nothing were in view."
    )]
    pub staleness_ms: Option<u64>,

    #[arg(long, help = "Calibration storage directory", value_name = "DIR")]
    pub storage_root: Option<PathBuf>,

    #[arg(
        long,
        help = "Calibration session to load (default: most recent)",
        value_name = "NAME"
    )]
    pub session: Option<String>,
}

impl SettingsArgs {
    /// Load the settings file if given, apply overrides, then validate.
    pub fn resolve(&self) -> Result<StationSettings, SettingsError> {
        let mut settings = match &self.config {
            Some(path) => StationSettings::load(path)?,
            None => StationSettings::default(),
        };
        self.apply(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut StationSettings) {
        if let Some(url) = &self.laser_url {
            settings.laser_url = url.clone();
        }
        if let Some(url) = &self.moonraker_url {
            settings.moonraker_url = url.clone();
        }
        if let Some(addr) = &self.detection_listen {
            settings.detection_listen = addr.clone();
        }
        if let Some(rate) = self.rate_hz {
            settings.control_rate_hz = rate;
        }
        if let Some(ms) = self.staleness_ms {
            settings.staleness_ms = ms;
        }
        if let Some(root) = &self.storage_root {
            settings.storage_root = Some(root.clone());
        }
        if let Some(session) = &self.session {
            settings.calibration_session = Some(session.clone());
        }
    }
}
