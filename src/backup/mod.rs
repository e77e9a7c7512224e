//! Versioned backup history of the live tree.
//!
//! Backups are commits in a git repository kept in the data directory whose
//! work tree is the live root. Only the configured backup directories are
//! ever staged, so large directories such as `gcodes/` stay out of it.

mod types;

pub use types::{BackupDetail, BackupFileDiff, BackupFileStatus, BackupSnapshot};

use anyhow::Context;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::diff::{checked_relative, text_hunks};
use crate::error::{Error, Result};
use crate::scm::{self, CommitInfo, Scm};

/// Appended to manual backup messages.
pub const FULL_BACKUP_SUFFIX: &str = " [full]";

pub struct BackupStore {
    repo: Box<dyn Scm>,
    live_root: PathBuf,
    dirs: Vec<String>,
}

impl BackupStore {
    /// Open the history at `repo_path`, creating it on first use.
    pub fn open(repo_path: &Path, live_root: &Path, dirs: Vec<String>) -> Result<Self> {
        let repo = scm::open_detached(repo_path, live_root)
            .with_context(|| format!("Failed to open backup repository {}", repo_path.display()))?;
        Ok(Self {
            live_root: repo.workdir().to_path_buf(),
            repo,
            dirs: dirs
                .into_iter()
                .map(|d| d.trim_matches('/').to_string())
                .filter(|d| !d.is_empty())
                .collect(),
        })
    }

    pub fn live_root(&self) -> &Path {
        &self.live_root
    }

    /// Stage the backup directories. Directories that vanished from the live
    /// tree are still staged while tracked, so their removal is recorded.
    fn stage(&self) -> Result<()> {
        let tracked = if self.repo.log()?.is_empty() {
            Vec::new()
        } else {
            self.repo.files_at("HEAD")?
        };
        let paths: Vec<String> = self
            .dirs
            .iter()
            .filter(|d| {
                self.live_root.join(d).is_dir()
                    || tracked.iter().any(|f| f.starts_with(&format!("{d}/")))
            })
            .cloned()
            .collect();
        self.repo.stage_paths(&paths)?;
        Ok(())
    }

    /// Record the live tree. Returns `None` when nothing changed since the
    /// previous snapshot.
    pub fn snapshot(&self, message: &str) -> Result<Option<BackupSnapshot>> {
        self.stage()?;
        if !self.repo.has_staged_changes()? {
            log::info!("No changes to back up ({message})");
            return Ok(None);
        }
        self.commit(message, false).map(Some)
    }

    /// Record the live tree even when nothing changed.
    pub fn manual_snapshot(&self, label: Option<&str>) -> Result<BackupSnapshot> {
        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("Manual backup");
        self.stage()?;
        self.commit(&format!("{label}{FULL_BACKUP_SUFFIX}"), true)
    }

    fn commit(&self, message: &str, allow_empty: bool) -> Result<BackupSnapshot> {
        let hash = self.repo.commit(message, allow_empty)?;
        log::info!("Backup commit: {} ({})", short(&hash), message);
        crate::logger::audit(&format!("Backup {} created: {}", short(&hash), message));

        let entry = self
            .repo
            .log()?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Backup history is empty after commit"))?;
        self.to_snapshot(&entry)
    }

    fn to_snapshot(&self, entry: &CommitInfo) -> Result<BackupSnapshot> {
        Ok(BackupSnapshot {
            hash: entry.hash.clone(),
            message: entry.message.clone(),
            timestamp: entry.timestamp.to_rfc3339(),
            files_changed: self
                .repo
                .changed_files(&entry.hash, entry.parent.as_deref())?
                .len(),
        })
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> Result<Vec<BackupSnapshot>> {
        self.repo
            .log()?
            .iter()
            .map(|entry| self.to_snapshot(entry))
            .collect()
    }

    /// Find a snapshot by full hash or unique prefix.
    fn find(&self, hash: &str) -> Result<CommitInfo> {
        let hash = hash.trim().to_ascii_lowercase();
        let well_formed =
            (4..=64).contains(&hash.len()) && hash.chars().all(|c| c.is_ascii_hexdigit());
        if !well_formed {
            return Err(Error::NotFound(format!("Backup not found: {hash}")));
        }

        let mut matches = self
            .repo
            .log()?
            .into_iter()
            .filter(|c| c.hash.starts_with(&hash));
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Ok(entry),
            (Some(_), Some(_)) => Err(Error::InvalidRequest(format!(
                "Ambiguous backup hash: {hash}"
            ))),
            (None, _) => Err(Error::NotFound(format!("Backup not found: {hash}"))),
        }
    }

    /// Every file in a snapshot.
    pub fn files_in(&self, hash: &str) -> Result<Vec<String>> {
        let entry = self.find(hash)?;
        Ok(self.repo.files_at(&entry.hash)?)
    }

    /// Files that differ from the snapshot's parent. After deleting an
    /// intermediate snapshot the parent is the nearest surviving ancestor.
    pub fn changed_files_in(&self, hash: &str) -> Result<Vec<String>> {
        let entry = self.find(hash)?;
        Ok(self
            .repo
            .changed_files(&entry.hash, entry.parent.as_deref())?)
    }

    pub fn detail(&self, hash: &str) -> Result<BackupDetail> {
        let hash = self.find(hash)?.hash;
        Ok(BackupDetail {
            files: self.files_in(&hash)?,
            changed_files: self.changed_files_in(&hash)?,
            hash,
        })
    }

    /// One file's change in a snapshot relative to its parent.
    pub fn file_diff_in(&self, hash: &str, path: &str) -> Result<BackupFileDiff> {
        checked_relative(path).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        let entry = self.find(hash)?;

        let new = self.repo.file_at(&entry.hash, path)?;
        let old = match entry.parent.as_deref() {
            Some(parent) => self.repo.file_at(parent, path)?,
            None => None,
        };

        let (status, hunks) = match (old, new) {
            (None, None) => {
                return Err(Error::NotFound(format!(
                    "File {path} not found in backup {}",
                    short(&entry.hash)
                )))
            }
            (None, Some(new)) => (BackupFileStatus::Added, text_hunks(&[], &new)),
            (Some(old), None) => (BackupFileStatus::Deleted, text_hunks(&old, &[])),
            (Some(old), Some(new)) if old == new => (BackupFileStatus::Unchanged, Vec::new()),
            (Some(old), Some(new)) => (BackupFileStatus::Modified, text_hunks(&old, &new)),
        };

        Ok(BackupFileDiff {
            file: path.to_string(),
            status,
            hunks,
        })
    }

    /// ZIP archive of the tree at a snapshot.
    pub fn archive_of(&self, hash: &str) -> Result<(String, Vec<u8>)> {
        let entry = self.find(hash)?;
        let archive = self.repo.archive_zip(&entry.hash)?;
        Ok((entry.hash, archive))
    }

    /// Make the backed-up directories match a snapshot. A pre-restore
    /// snapshot is recorded first, so the restore itself can be undone.
    pub fn restore(&self, hash: &str) -> Result<Vec<String>> {
        let target = self.find(hash)?;
        self.snapshot("Pre-restore backup")?;

        let files = self.repo.files_at(&target.hash)?;
        let keep: BTreeSet<&str> = files.iter().map(String::as_str).collect();

        for current in self.repo.files_at("HEAD")? {
            if keep.contains(current.as_str()) {
                continue;
            }
            let live = self.live_root.join(checked_relative(&current)?);
            if live.is_file() {
                fs::remove_file(&live)
                    .with_context(|| format!("Failed to remove {}", live.display()))?;
            }
        }

        for path in &files {
            let content = self
                .repo
                .file_at(&target.hash, path)?
                .ok_or_else(|| anyhow::anyhow!("{path} vanished from backup"))?;
            let live = self.live_root.join(checked_relative(path)?);
            if let Some(parent) = live.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&live, content)
                .with_context(|| format!("Failed to write {}", live.display()))?;
        }

        self.snapshot(&format!("Restored from backup {}", short(&target.hash)))?;
        Ok(files)
    }

    /// Remove one snapshot. Its successors are re-parented onto the nearest
    /// surviving ancestor, which reissues their hashes.
    pub fn delete(&self, hash: &str) -> Result<String> {
        let entry = self.find(hash)?;
        if self.repo.log()?.len() == 1 {
            return Err(Error::LastBackup);
        }
        self.repo.drop_commit(&entry.hash)?;
        log::info!("Deleted backup {} ({})", short(&entry.hash), entry.message);
        Ok(entry.hash)
    }
}

/// Abbreviated hash used in messages.
pub fn short(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}
