//! The daemon's single service object.
//!
//! [`ConfigSyncService`] owns every store and the one lock guarding the
//! device's trees. Mutations (sync checkout, applies, snapshots, restore,
//! delete, settings) take the lock exclusively; reads share it. The network
//! part of a sync runs outside the lock so status and diff reads stay
//! responsive while a fetch is in flight.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backup::{BackupDetail, BackupFileDiff, BackupSnapshot, BackupStore};
use crate::config::DaemonConfig;
use crate::diff::{DiffEngine, FileDetail, FileSummary, Hunk, PathMapper, ProtectList};
use crate::error::{Error, Result};
use crate::logger::audit;
use crate::patch::{HunkApplyResult, PatchApplier};
use crate::reference::{ReferenceSet, ReferenceStore, SyncOutcome};
use crate::settings::{DeviceStatus, Settings, SettingsStore, SettingsUpdate};

/// Response of `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: DeviceStatus,
    pub detected_version: String,
    pub active_branch: String,
    pub reference_repo_url: String,
    pub last_sync_timestamp: String,
    pub branches: Vec<String>,
}

/// Response of `POST /sync`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub active_branch: String,
    pub exact: bool,
    pub warning: Option<String>,
    pub branches: Vec<String>,
}

struct State {
    backups: BackupStore,
    settings: Settings,
    active: Option<ReferenceSet>,
}

/// Clears the syncing flag however the sync ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ConfigSyncService {
    detected_version: String,
    reference: ReferenceStore,
    engine: DiffEngine,
    settings_store: Box<dyn SettingsStore>,
    syncing: AtomicBool,
    state: RwLock<State>,
    /// Hunks last shown per file; selective applies are checked against them.
    /// Shared by every client: the most recent diff of a file replaces what
    /// any earlier reader was shown.
    presented: Mutex<HashMap<String, Vec<Hunk>>>,
}

impl ConfigSyncService {
    pub fn new(config: &DaemonConfig, settings_store: Box<dyn SettingsStore>) -> Result<Self> {
        config.ensure_data_dir()?;

        let reference = ReferenceStore::new(config.reference_dir()?, config.git_timeout_secs);
        let engine = DiffEngine::new(
            PathMapper::new(config.directories.clone(), &config.live_root),
            ProtectList::new(config.protected.clone()),
        );
        let backups = BackupStore::open(
            &config.backup_dir()?,
            &config.live_root,
            config.backup_dirs.clone(),
        )?;
        let settings = settings_store.load()?;

        // Only a checkout a sync resolved to counts; a fresh clone sits on the remote default
        let active = match reference.current() {
            Ok(Some(current))
                if !settings.active_branch.is_empty()
                    && current.branch == settings.active_branch =>
            {
                Some(current)
            }
            Ok(Some(current)) => {
                log::info!(
                    "Ignoring reference checkout {}: no sync resolved to it",
                    current.branch
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Ignoring unreadable reference checkout: {e}");
                None
            }
        };
        if let Some(active) = &active {
            log::info!(
                "Reference checkout at {} ({} files)",
                active.branch,
                active.files.len()
            );
        }

        Ok(Self {
            detected_version: config.device_version.clone().unwrap_or_default(),
            reference,
            engine,
            settings_store,
            syncing: AtomicBool::new(false),
            state: RwLock::new(State {
                backups,
                settings,
                active,
            }),
            presented: Mutex::new(HashMap::new()),
        })
    }

    pub fn detected_version(&self) -> &str {
        &self.detected_version
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> Settings {
        self.state.read().settings.clone()
    }

    fn persist(&self, settings: &Settings) {
        if let Err(e) = self.settings_store.save(settings) {
            log::error!("Failed to persist settings: {e:#}");
        }
    }

    fn active_or_not_found(active: &Option<ReferenceSet>) -> Result<&ReferenceSet> {
        active
            .as_ref()
            .ok_or_else(|| Error::NotFound("No reference checkout yet, run a sync first".to_string()))
    }

    pub fn status(&self) -> Result<StatusReport> {
        let state = self.state.read();
        let settings = &state.settings;

        let status = if self.is_syncing() {
            DeviceStatus::Syncing
        } else if settings.reference_repo_url.is_empty() {
            DeviceStatus::NotConfigured
        } else {
            settings.status
        };

        Ok(StatusReport {
            status,
            detected_version: self.detected_version.clone(),
            active_branch: state
                .active
                .as_ref()
                .map(|a| a.branch.clone())
                .unwrap_or_else(|| settings.active_branch.clone()),
            reference_repo_url: settings.reference_repo_url.clone(),
            last_sync_timestamp: settings.last_sync_timestamp.clone(),
            branches: self.reference.branches().unwrap_or_default(),
        })
    }

    /// Fetch the reference repository and check out the resolved branch.
    ///
    /// The fetch happens without holding the state lock; only the checkout
    /// and the settings update do. A second sync while one is running fails
    /// with [`Error::SyncInProgress`] instead of queueing.
    pub fn sync(&self) -> Result<SyncReport> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::SyncInProgress);
        }
        let _guard = SyncGuard(&self.syncing);

        let settings = self.settings();
        let url = settings.reference_repo_url.trim().to_string();

        let result = if url.is_empty() {
            Err(Error::NotConfigured)
        } else {
            log::info!("Syncing reference repository {url}");
            self.reference.sync(
                &url,
                &self.detected_version,
                &settings.version_override,
                || self.state.write(),
            )
        };

        match result {
            Ok((outcome, mut state)) => {
                let SyncOutcome {
                    reference,
                    resolution,
                    branches,
                } = outcome;
                state.settings.active_branch = reference.branch.clone();
                state.settings.last_sync_timestamp = chrono::Utc::now().to_rfc3339();
                state.settings.status = DeviceStatus::UpToDate;
                self.persist(&state.settings);
                audit(&format!(
                    "Synced reference {} at {}",
                    reference.branch,
                    &reference.commit[..reference.commit.len().min(8)]
                ));
                state.active = Some(reference);
                self.presented.lock().clear();

                Ok(SyncReport {
                    active_branch: resolution.branch,
                    exact: resolution.exact,
                    warning: resolution.warning,
                    branches,
                })
            }
            Err(e) => {
                let mut state = self.state.write();
                state.settings.status = match e {
                    Error::NotConfigured => DeviceStatus::NotConfigured,
                    _ => DeviceStatus::Error,
                };
                self.persist(&state.settings);
                log::error!("Sync failed: {e}");
                audit(&format!("Sync failed: {e}"));
                Err(e)
            }
        }
    }

    pub fn branches(&self) -> Result<Vec<String>> {
        let _state = self.state.read();
        self.reference.branches()
    }

    /// Tracked files of the active checkout.
    pub fn reference_files(&self) -> Result<Vec<String>> {
        let _state = self.state.read();
        self.reference.files_in_checkout()
    }

    /// Summary-mode diff of every file. Empty before the first sync.
    ///
    /// Replaces the presented hunks of every file, including ones another
    /// client diffed earlier. A later [`apply_hunks`](Self::apply_hunks)
    /// is checked against these.
    pub fn diff_summary(&self) -> Result<Vec<FileSummary>> {
        let state = self.state.read();
        let Some(active) = state.active.as_ref() else {
            return Ok(Vec::new());
        };

        let diffs = self.engine.diff_all(active.tree(self.reference.root()))?;
        let mut presented = self.presented.lock();
        presented.clear();
        for diff in &diffs {
            if !diff.hunks.is_empty() {
                presented.insert(diff.path.clone(), diff.hunks.clone());
            }
        }
        Ok(diffs.iter().map(|d| d.summary()).collect())
    }

    /// Detail-mode diff of one file.
    pub fn diff_file(&self, path: &str) -> Result<FileDetail> {
        let state = self.state.read();
        let active = Self::active_or_not_found(&state.active)?;

        let diff = self.engine.diff_file(active.tree(self.reference.root()), path)?;
        self.presented
            .lock()
            .insert(diff.path.clone(), diff.hunks.clone());
        Ok(diff.detail())
    }

    pub fn apply_all(&self) -> Result<Vec<String>> {
        let state = self.state.write();
        let active = Self::active_or_not_found(&state.active)?;

        let applier = PatchApplier::new(&self.engine, &state.backups);
        let applied = applier.apply_all(active.tree(self.reference.root()), &active.branch)?;
        self.presented.lock().clear();

        if !applied.is_empty() {
            audit(&format!(
                "Applied reference {}: {} file(s)",
                active.branch,
                applied.len()
            ));
        }
        Ok(applied)
    }

    pub fn apply_file(&self, path: &str) -> Result<Vec<String>> {
        let state = self.state.write();
        let active = Self::active_or_not_found(&state.active)?;

        let applier = PatchApplier::new(&self.engine, &state.backups);
        let applied = applier.apply_file(active.tree(self.reference.root()), path)?;
        self.presented.lock().remove(path);

        audit(&format!("Applied {path} from reference {}", active.branch));
        Ok(applied)
    }

    pub fn apply_hunks(&self, path: &str, indices: &[usize]) -> Result<HunkApplyResult> {
        let state = self.state.write();
        let active = Self::active_or_not_found(&state.active)?;

        // Positions shift after an apply; the next apply must follow a new diff
        let presented = self.presented.lock().remove(path);
        let applier = PatchApplier::new(&self.engine, &state.backups);
        let result = applier.apply_hunks(
            active.tree(self.reference.root()),
            path,
            indices,
            presented.as_deref(),
        )?;

        audit(&format!(
            "Applied hunks {:?} to {path}, failed {:?}",
            result.applied, result.failed
        ));
        Ok(result)
    }

    pub fn backups(&self) -> Result<Vec<BackupSnapshot>> {
        self.state.read().backups.list()
    }

    pub fn backup_detail(&self, hash: &str) -> Result<BackupDetail> {
        self.state.read().backups.detail(hash)
    }

    pub fn backup_file_diff(&self, hash: &str, path: &str) -> Result<BackupFileDiff> {
        self.state.read().backups.file_diff_in(hash, path)
    }

    /// Full hash and ZIP archive of a snapshot.
    pub fn backup_archive(&self, hash: &str) -> Result<(String, Vec<u8>)> {
        self.state.read().backups.archive_of(hash)
    }

    pub fn manual_backup(&self, message: Option<&str>) -> Result<BackupSnapshot> {
        let state = self.state.write();
        let snapshot = state.backups.manual_snapshot(message)?;
        audit(&format!("Manual backup {}", snapshot.message));
        Ok(snapshot)
    }

    pub fn restore(&self, hash: &str) -> Result<Vec<String>> {
        let state = self.state.write();
        let restored = state.backups.restore(hash)?;
        self.presented.lock().clear();
        audit(&format!("Restored backup {hash} ({} files)", restored.len()));
        Ok(restored)
    }

    pub fn delete_backup(&self, hash: &str) -> Result<String> {
        let state = self.state.write();
        let deleted = state.backups.delete(hash)?;
        audit(&format!("Deleted backup {deleted}"));
        Ok(deleted)
    }

    /// Merge and persist a settings update.
    pub fn update_settings(&self, update: &SettingsUpdate) -> Result<()> {
        let mut state = self.state.write();
        if update.apply_to(&mut state.settings) {
            self.settings_store.save(&state.settings)?;
            audit(&format!(
                "Settings updated: url={:?} override={:?} interval={}",
                state.settings.reference_repo_url,
                state.settings.version_override,
                state.settings.sync_interval
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::JsonSettingsStore;
    use tempfile::TempDir;

    fn service(temp: &TempDir) -> ConfigSyncService {
        let config = DaemonConfig {
            data_dir: Some(temp.path().join("data")),
            live_root: temp.path().join("live"),
            device_version: Some("3.5.1".to_string()),
            ..Default::default()
        };
        let store = JsonSettingsStore::new(config.settings_path().unwrap());
        ConfigSyncService::new(&config, Box::new(store)).unwrap()
    }

    #[test]
    fn test_unconfigured_status_and_sync() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let status = service.status().unwrap();
        assert_eq!(status.status, DeviceStatus::NotConfigured);
        assert_eq!(status.detected_version, "3.5.1");
        assert!(status.branches.is_empty());

        assert!(matches!(service.sync(), Err(Error::NotConfigured)));
        assert!(!service.is_syncing());
    }

    #[test]
    fn test_reads_before_first_sync() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        assert!(service.diff_summary().unwrap().is_empty());
        assert!(matches!(service.diff_file("sys/config.g"), Err(Error::NotFound(_))));
        assert!(matches!(service.apply_all(), Err(Error::NotFound(_))));
        assert!(service.reference_files().unwrap().is_empty());
    }

    #[test]
    fn test_settings_update_persists() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let update: SettingsUpdate =
            serde_json::from_str(r#"{"referenceRepoUrl":"file:///nowhere","syncInterval":15}"#)
                .unwrap();
        service.update_settings(&update).unwrap();

        let reloaded = JsonSettingsStore::new(temp.path().join("data/settings.json"))
            .load()
            .unwrap();
        assert_eq!(reloaded.reference_repo_url, "file:///nowhere");
        assert_eq!(reloaded.sync_interval, 15);
    }

    #[test]
    fn test_failed_sync_sets_error_status() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let update = SettingsUpdate {
            reference_repo_url: Some(temp.path().join("missing").to_string_lossy().into_owned()),
            ..Default::default()
        };
        service.update_settings(&update).unwrap();

        assert!(matches!(service.sync(), Err(Error::Sync(_))));
        assert_eq!(service.status().unwrap().status, DeviceStatus::Error);
        assert!(!service.is_syncing());
    }

    #[test]
    fn test_reads_while_syncing() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        // Fetch phase: flag raised, lock free
        service.syncing.store(true, Ordering::SeqCst);
        assert_eq!(service.status().unwrap().status, DeviceStatus::Syncing);
        assert!(matches!(service.sync(), Err(Error::SyncInProgress)));
        assert!(service.diff_summary().unwrap().is_empty());
        assert!(service.backups().unwrap().is_empty());
        assert!(service.is_syncing());

        service.syncing.store(false, Ordering::SeqCst);
        assert_eq!(service.status().unwrap().status, DeviceStatus::NotConfigured);
    }

    /// Parks every save until the test releases it.
    struct GatedStore {
        entered: std::sync::mpsc::Sender<()>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl SettingsStore for GatedStore {
        fn load(&self) -> anyhow::Result<Settings> {
            Ok(Settings::default())
        }

        fn save(&self, _settings: &Settings) -> anyhow::Result<()> {
            self.entered.send(()).unwrap();
            self.release.lock().recv().unwrap();
            Ok(())
        }
    }

    #[test]
    fn test_second_sync_rejected_while_first_runs() {
        let temp = TempDir::new().unwrap();
        let config = DaemonConfig {
            data_dir: Some(temp.path().join("data")),
            live_root: temp.path().join("live"),
            ..Default::default()
        };
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let store = GatedStore {
            entered: entered_tx,
            release: Mutex::new(release_rx),
        };
        let service = ConfigSyncService::new(&config, Box::new(store)).unwrap();

        std::thread::scope(|scope| {
            let first = scope.spawn(|| service.sync());

            // The first sync is now persisting its outcome
            entered_rx.recv().unwrap();
            assert!(service.is_syncing());
            assert!(matches!(service.sync(), Err(Error::SyncInProgress)));

            release_tx.send(()).unwrap();
            assert!(matches!(first.join().unwrap(), Err(Error::NotConfigured)));
        });

        assert!(!service.is_syncing());
        assert_eq!(service.status().unwrap().status, DeviceStatus::NotConfigured);
    }
}
