//! Persistent storage for calibration sessions.
//!
//! Each session is one JSON file under `calibrations/` in the storage root,
//! which defaults to `~/.goose_sentry/`. Only validated sample sets are ever
//! written; loading re-validates so a hand-edited file cannot produce a
//! partially usable model.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::calibration::{CalibrationError, CalibrationModel, CalibrationSample};

/// Error type for calibration storage
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("calibration session '{0}' not found")]
    NotFound(String),

    #[error("invalid session name '{0}' (use letters, digits, '_', '-', '.')")]
    InvalidName(String),

    #[error("calibration rejected: {0}")]
    Calibration(#[from] CalibrationError),
}

/// A named set of calibration samples as collected by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSession {
    pub name: String,
    /// Unix seconds
    pub created_at: u64,
    /// Camera zoom setting the samples were taken at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Samples in the order they were collected
    pub samples: Vec<CalibrationSample>,
}

impl CalibrationSession {
    pub fn new(name: impl Into<String>, samples: Vec<CalibrationSample>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            name: name.into(),
            created_at,
            zoom_label: None,
            notes: None,
            samples,
        }
    }

    pub fn with_zoom_label(mut self, label: impl Into<String>) -> Self {
        self.zoom_label = Some(label.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Validate the samples and build a model from them.
    pub fn model(&self) -> Result<CalibrationModel, CalibrationError> {
        CalibrationModel::build(&self.samples)
    }
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// File stem; the key `load_session` resolves
    pub stem: String,
    /// Name recorded inside the file
    pub name: String,
    pub created_at: u64,
    pub sample_count: usize,
}

/// Check a session name is safe to use as a file stem.
pub fn validate_session_name(name: &str) -> Result<(), StorageError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if name.is_empty() || name.starts_with('.') || !valid_chars {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Storage manager for calibration sessions.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    /// Root directory for all persisted state (e.g., ~/.goose_sentry)
    root_path: PathBuf,
}

impl CalibrationStore {
    /// Create a store at the default path (~/.goose_sentry)
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        Ok(Self::with_path(PathBuf::from(home).join(".goose_sentry")))
    }

    /// Create a store with a custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn calibrations_dir(&self) -> PathBuf {
        self.root_path.join("calibrations")
    }

    fn session_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_session_name(name)?;
        Ok(self.calibrations_dir().join(format!("{name}.json")))
    }

    /// Save a session after validating its samples.
    ///
    /// Overwrites any existing session with the same name. Returns the path
    /// written.
    pub fn save_session(&self, session: &CalibrationSession) -> Result<PathBuf, StorageError> {
        let path = self.session_path(&session.name)?;
        session.model()?;

        std::fs::create_dir_all(self.calibrations_dir())?;

        // Write then rename so readers never see a truncated file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(session)?)?;
        std::fs::rename(&tmp, &path)?;

        debug!(
            "Saved calibration '{}' ({} samples) to {}",
            session.name,
            session.samples.len(),
            path.display()
        );
        Ok(path)
    }

    /// Load a session by name.
    pub fn load_session(&self, name: &str) -> Result<CalibrationSession, StorageError> {
        let path = self.session_path(name)?;
        if !path.exists() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load a session and build its model.
    pub fn load_model(&self, name: &str) -> Result<CalibrationModel, StorageError> {
        Ok(self.load_session(name)?.model()?)
    }

    /// All stored sessions, oldest first.
    ///
    /// Files that fail to parse are logged and left out.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let dir = self.calibrations_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_session_name(stem).is_err() {
                warn!("Ignoring calibration with unusable file name {}", path.display());
                continue;
            }
            let stem = stem.to_string();

            let parsed = std::fs::read_to_string(&path)
                .map_err(StorageError::from)
                .and_then(|s| Ok(serde_json::from_str::<CalibrationSession>(&s)?));
            match parsed {
                Ok(session) => sessions.push(SessionSummary {
                    stem,
                    name: session.name,
                    created_at: session.created_at,
                    sample_count: session.samples.len(),
                }),
                Err(e) => warn!("Ignoring unreadable calibration {}: {}", path.display(), e),
            }
        }

        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.stem.cmp(&b.stem))
        });
        Ok(sessions)
    }

    /// Most recently created session, if any.
    pub fn latest_session(&self) -> Result<Option<CalibrationSession>, StorageError> {
        match self.list_sessions()?.pop() {
            Some(summary) => Ok(Some(self.load_session(&summary.stem)?)),
            None => Ok(None),
        }
    }

    /// Delete a session.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete_session(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.session_path(name)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(PathBuf::from(".goose_sentry")))
    }
}
