//! Local mirror of the reference configuration repository.

use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::diff::ReferenceTree;
use crate::error::{Error, Result};
use crate::scm::{self, GitScm, Scm};
use crate::version::{self, Resolution};

const REMOTE: &str = "origin";

/// The checked-out reference state. Replaced wholesale on every sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceSet {
    pub branch: String,
    pub commit: String,
    pub files: Vec<String>,
}

/// Result of a full sync.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub reference: ReferenceSet,
    pub resolution: Resolution,
    pub branches: Vec<String>,
}

pub struct ReferenceStore {
    path: PathBuf,
    network_timeout_secs: u64,
}

/// Reject names git could read as options or range syntax.
fn validate_ref_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('-')
        || name.contains("..")
        || name.chars().any(|c| c.is_whitespace() || c.is_control());
    if invalid {
        return Err(Error::Resolution(format!("Invalid branch name '{name}'")));
    }
    Ok(())
}

impl ReferenceStore {
    pub fn new(path: impl Into<PathBuf>, network_timeout_secs: u64) -> Self {
        Self {
            path: path.into(),
            network_timeout_secs,
        }
    }

    /// Directory holding the checkout.
    pub fn root(&self) -> &Path {
        &self.path
    }

    pub fn is_cloned(&self) -> bool {
        scm::is_repo(&self.path)
    }

    fn repo(&self) -> anyhow::Result<Box<dyn Scm>> {
        Ok(Box::new(
            GitScm::open(&self.path)?.with_network_timeout(self.network_timeout_secs),
        ))
    }

    /// Clone the mirror on first use; afterwards keep `origin` pointing at `url`.
    pub fn init(&self, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::NotConfigured);
        }

        if !self.is_cloned() {
            if self.path.exists() {
                log::warn!(
                    "Removing stale reference directory {}",
                    self.path.display()
                );
                std::fs::remove_dir_all(&self.path).with_context(|| {
                    format!("Failed to remove {}", self.path.display())
                })?;
            }
            log::info!("Cloning reference repository {} ...", url);
            GitScm::clone(url, &self.path).map_err(|e| Error::Sync(format!("{e:#}")))?;
            crate::logger::audit(&format!("Cloned reference repository {url}"));
            return Ok(());
        }

        let repo = self.repo()?;
        let current = repo.get_remote_url(REMOTE).unwrap_or_default();
        if current != url {
            log::info!("Reference URL changed, re-pointing {REMOTE} to {url}");
            repo.set_remote_url(REMOTE, url)?;
        }
        Ok(())
    }

    /// Clone if needed and fetch. On failure the checkout is untouched.
    pub fn fetch(&self, url: &str) -> Result<Vec<String>> {
        self.init(url)?;
        let repo = self.repo()?;
        repo.fetch(REMOTE)
            .map_err(|e| Error::Sync(format!("{e:#}")))?;
        Ok(repo.remote_branches(REMOTE)?)
    }

    /// Remote branch names, empty before the first clone.
    pub fn branches(&self) -> Result<Vec<String>> {
        if !self.is_cloned() {
            return Ok(Vec::new());
        }
        Ok(self.repo()?.remote_branches(REMOTE)?)
    }

    /// Point the working tree at a fetched branch (or tag).
    pub fn checkout(&self, name: &str) -> Result<ReferenceSet> {
        validate_ref_name(name)?;
        let repo = self.repo()?;
        repo.checkout(REMOTE, name)
            .map_err(|e| Error::Sync(format!("{e:#}")))?;
        log::info!("Checked out reference {name}");

        Ok(ReferenceSet {
            branch: name.to_string(),
            commit: repo.current_commit_hash()?,
            files: repo.tracked_files()?,
        })
    }

    /// Fetch, resolve the branch for `detected`, and check it out.
    ///
    /// `lock` runs after resolution and before the checkout touches the
    /// working tree. Its guard is held across the checkout and handed back,
    /// so callers can serialize readers against the tree swap without
    /// blocking them during the fetch.
    pub fn sync<G>(
        &self,
        url: &str,
        detected: &str,
        version_override: &str,
        lock: impl FnOnce() -> G,
    ) -> Result<(SyncOutcome, G)> {
        let branches = self.fetch(url)?;
        let resolution = version::resolve(detected, version_override, &branches)?;
        let guard = lock();
        let reference = self.checkout(&resolution.branch)?;
        Ok((
            SyncOutcome {
                reference,
                resolution,
                branches,
            },
            guard,
        ))
    }

    /// Files tracked by the current checkout.
    pub fn files_in_checkout(&self) -> Result<Vec<String>> {
        if !self.is_cloned() {
            return Ok(Vec::new());
        }
        Ok(self.repo()?.tracked_files()?)
    }

    /// The current checkout, `None` before the first clone.
    pub fn current(&self) -> Result<Option<ReferenceSet>> {
        if !self.is_cloned() {
            return Ok(None);
        }
        let repo = self.repo()?;
        Ok(Some(ReferenceSet {
            branch: repo.current_branch()?,
            commit: repo.current_commit_hash()?,
            files: repo.tracked_files()?,
        }))
    }
}

impl ReferenceSet {
    /// View used by the diff engine.
    pub fn tree<'a>(&'a self, root: &'a Path) -> ReferenceTree<'a> {
        ReferenceTree {
            root,
            files: &self.files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {args:?} failed");
    }

    /// Upstream with `main` and `3.5` branches.
    fn upstream(temp: &TempDir) -> PathBuf {
        let path = temp.path().join("upstream");
        let repo = GitScm::init(&path).unwrap();
        std::fs::create_dir_all(path.join("sys")).unwrap();
        std::fs::write(path.join("sys/config.g"), "G28\n").unwrap();
        repo.stage_paths(&["sys".to_string()]).unwrap();
        repo.commit("main config", false).unwrap();
        git(&path, &["branch", "-M", "main"]);
        git(&path, &["checkout", "-q", "-b", "3.5"]);
        std::fs::write(path.join("sys/config.g"), "G28\nM906 X800\n").unwrap();
        repo.stage_paths(&["sys".to_string()]).unwrap();
        repo.commit("3.5 config", false).unwrap();
        git(&path, &["checkout", "-q", "main"]);
        path
    }

    #[test]
    fn test_validate_ref_name() {
        assert!(validate_ref_name("3.5").is_ok());
        assert!(validate_ref_name("release/3.5").is_ok());
        for bad in ["", "-f", "a..b", "with space", "tab\t"] {
            assert!(validate_ref_name(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_unconfigured() {
        let temp = TempDir::new().unwrap();
        let store = ReferenceStore::new(temp.path().join("reference"), 30);
        assert!(matches!(store.init(" "), Err(Error::NotConfigured)));
        assert!(store.branches().unwrap().is_empty());
        assert!(store.current().unwrap().is_none());
    }

    #[test]
    fn test_sync_clones_and_resolves() {
        let temp = TempDir::new().unwrap();
        let url = upstream(&temp).to_string_lossy().into_owned();
        let store = ReferenceStore::new(temp.path().join("reference"), 30);

        let (outcome, ()) = store.sync(&url, "3.5.1", "", || ()).unwrap();
        assert_eq!(outcome.branches, vec!["3.5", "main"]);
        assert_eq!(outcome.resolution.branch, "3.5");
        assert!(!outcome.resolution.exact);
        assert_eq!(outcome.reference.files, vec!["sys/config.g"]);
        assert_eq!(
            std::fs::read_to_string(store.root().join("sys/config.g")).unwrap(),
            "G28\nM906 X800\n"
        );
        assert_eq!(store.current().unwrap().unwrap().branch, "3.5");
    }

    #[test]
    fn test_failed_fetch_keeps_checkout() {
        let temp = TempDir::new().unwrap();
        let upstream = upstream(&temp);
        let url = upstream.to_string_lossy().into_owned();
        let store = ReferenceStore::new(temp.path().join("reference"), 30);
        let before = store.sync(&url, "3.5", "", || ()).unwrap().0.reference;

        std::fs::remove_dir_all(&upstream).unwrap();
        assert!(matches!(store.sync(&url, "3.5", "", || ()), Err(Error::Sync(_))));

        let after = store.current().unwrap().unwrap();
        assert_eq!(after.commit, before.commit);
        assert!(store.root().join("sys/config.g").exists());
    }

    #[test]
    fn test_url_change_repoints_origin() {
        let temp = TempDir::new().unwrap();
        let first = upstream(&temp);
        let second = temp.path().join("mirror-of-upstream");
        git(
            temp.path(),
            &["clone", "-q", "--bare", &first.to_string_lossy(), &second.to_string_lossy()],
        );

        let store = ReferenceStore::new(temp.path().join("reference"), 30);
        store
            .sync(&first.to_string_lossy(), "", "main", || ())
            .unwrap();
        store.init(&second.to_string_lossy()).unwrap();

        let repo = GitScm::open(store.root()).unwrap();
        assert_eq!(
            repo.get_remote_url("origin").unwrap(),
            second.to_string_lossy()
        );
    }

    #[test]
    fn test_unknown_override_is_sync_error() {
        let temp = TempDir::new().unwrap();
        let url = upstream(&temp).to_string_lossy().into_owned();
        let store = ReferenceStore::new(temp.path().join("reference"), 30);
        assert!(matches!(
            store.sync(&url, "3.5", "does-not-exist", || ()),
            Err(Error::Sync(_))
        ));
    }

    #[test]
    fn test_unresolved_sync_skips_lock_and_checkout() {
        let temp = TempDir::new().unwrap();
        let url = upstream(&temp).to_string_lossy().into_owned();
        let store = ReferenceStore::new(temp.path().join("reference"), 30);

        let mut locked = false;
        let result = store.sync(&url, "2.0", "", || locked = true);
        assert!(matches!(result, Err(Error::Resolution(_))));
        assert!(!locked);
        // The clone exists but still sits on the remote default
        assert_eq!(store.current().unwrap().unwrap().branch, "main");
    }
}
