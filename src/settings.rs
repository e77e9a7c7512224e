//! Operator settings and last-known sync state.
//!
//! Settings persistence is a collaborator of the core: the resolver and the
//! reference store only read a [`Settings`] value. [`JsonSettingsStore`] is the
//! file-backed implementation the daemon uses.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Device status as reported by `GET /status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// No reference repository URL has been set
    #[default]
    NotConfigured,
    /// The last sync succeeded
    UpToDate,
    /// The last sync failed or no branch could be resolved
    Error,
    /// A fetch is in flight (never persisted)
    Syncing,
}

impl DeviceStatus {
    /// Returns a human-readable string representation
    pub fn as_str(&self) -> &str {
        match self {
            DeviceStatus::NotConfigured => "not_configured",
            DeviceStatus::UpToDate => "up_to_date",
            DeviceStatus::Error => "error",
            DeviceStatus::Syncing => "syncing",
        }
    }
}

/// Persisted settings. Unknown keys in the file are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// URL of the reference configuration repository
    pub reference_repo_url: String,

    /// Branch or tag to use instead of resolving from the device version
    #[serde(alias = "firmwareBranchOverride")]
    pub version_override: String,

    /// Background sync cadence in minutes, 0 disables it
    pub sync_interval: u64,

    /// Branch checked out by the last successful sync
    pub active_branch: String,

    /// RFC 3339 time of the last successful sync
    pub last_sync_timestamp: String,

    /// Outcome of the last sync
    pub status: DeviceStatus,
}

/// Partial update accepted by `POST /settings`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub reference_repo_url: Option<String>,
    #[serde(alias = "firmwareBranchOverride")]
    pub version_override: Option<String>,
    pub sync_interval: Option<u64>,
}

impl SettingsUpdate {
    /// Merge into `settings`, returning whether anything changed.
    pub fn apply_to(&self, settings: &mut Settings) -> bool {
        let before = settings.clone();

        if let Some(url) = &self.reference_repo_url {
            settings.reference_repo_url = url.trim().to_string();
            if settings.reference_repo_url.is_empty() {
                settings.status = DeviceStatus::NotConfigured;
            }
        }
        if let Some(version_override) = &self.version_override {
            settings.version_override = version_override.trim().to_string();
        }
        if let Some(interval) = self.sync_interval {
            settings.sync_interval = interval;
        }

        *settings != before
    }
}

/// Storage seam for [`Settings`].
pub trait SettingsStore: Send + Sync {
    /// Load settings; a missing store yields defaults.
    fn load(&self) -> Result<Settings>;

    /// Persist settings, replacing what was stored.
    fn save(&self, settings: &Settings) -> Result<()>;
}

/// Settings stored as pretty-printed JSON.
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Settings> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read settings: {}", self.path.display())
                })
            }
        };

        match serde_json::from_str::<Settings>(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable settings file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(Settings::default())
            }
        }
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Syncing is transient state; persist the last settled outcome instead
        let mut persisted = settings.clone();
        if persisted.status == DeviceStatus::Syncing {
            persisted.status = if persisted.active_branch.is_empty() {
                DeviceStatus::NotConfigured
            } else {
                DeviceStatus::UpToDate
            };
        }

        let content =
            serde_json::to_string_pretty(&persisted).context("Failed to serialize settings")?;

        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write settings: {}", self.path.display()))?;

        Ok(())
    }
}
