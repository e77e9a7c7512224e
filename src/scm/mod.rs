//! SCM (Source Control Management) abstraction layer.
//!
//! Both the reference mirror and the backup history are git repositories
//! driven through the git CLI. Everything above this module talks to them
//! through the [`Scm`] trait only, so the mechanism can be swapped without
//! touching the diff, patch, or backup logic.

mod git;

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use std::path::Path;

pub use git::GitScm;

/// One entry of the commit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Full commit hash.
    pub hash: String,
    /// Parent hash, `None` for a root commit.
    pub parent: Option<String>,
    /// Author date, preserved across history rewrites.
    pub timestamp: DateTime<FixedOffset>,
    /// First line of the commit message.
    pub message: String,
}

/// Trait for source control management operations.
pub trait Scm: Send + Sync {
    /// Working tree the repository operates on.
    fn workdir(&self) -> &Path;

    /// Get the current branch name, or the tag name for a detached checkout.
    fn current_branch(&self) -> Result<String>;

    /// Get the current commit hash.
    fn current_commit_hash(&self) -> Result<String>;

    /// Get the URL for a remote.
    fn get_remote_url(&self, name: &str) -> Result<String>;

    /// Set or update the URL for a remote.
    fn set_remote_url(&self, name: &str, url: &str) -> Result<()>;

    /// Fetch branches and tags from a remote, pruning deleted refs.
    fn fetch(&self, remote: &str) -> Result<()>;

    /// Branch names known on a remote, without the remote prefix, sorted.
    fn remote_branches(&self, remote: &str) -> Result<Vec<String>>;

    /// Force the working tree to a remote branch, or to a tag when no such
    /// branch exists.
    fn checkout(&self, remote: &str, name: &str) -> Result<()>;

    /// Files tracked in the current checkout.
    fn tracked_files(&self) -> Result<Vec<String>>;

    /// Stage additions, modifications and removals under the given paths.
    fn stage_paths(&self, paths: &[String]) -> Result<()>;

    /// Check if the index differs from HEAD.
    fn has_staged_changes(&self) -> Result<bool>;

    /// Commit staged changes with a message, returning the new hash.
    fn commit(&self, message: &str, allow_empty: bool) -> Result<String>;

    /// Commit log reachable from HEAD, newest first. Empty before the first commit.
    fn log(&self) -> Result<Vec<CommitInfo>>;

    /// All files present at a revision.
    fn files_at(&self, rev: &str) -> Result<Vec<String>>;

    /// Files that differ between `base` and `rev`. With no base, every file
    /// of `rev` counts as changed.
    fn changed_files(&self, rev: &str, base: Option<&str>) -> Result<Vec<String>>;

    /// Raw content of a file at a revision, `None` when the file is absent.
    fn file_at(&self, rev: &str, path: &str) -> Result<Option<Vec<u8>>>;

    /// ZIP archive of the full tree at a revision.
    fn archive_zip(&self, rev: &str) -> Result<Vec<u8>>;

    /// Remove one commit from a linear history. Descendants are re-created on
    /// top of its parent with their trees, messages and dates unchanged.
    fn drop_commit(&self, rev: &str) -> Result<()>;
}

/// Check if a directory is a Git repository.
pub fn is_repo(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Open (initializing if needed) a repository stored at `repo_path` whose
/// working tree is `worktree`.
pub fn open_detached(repo_path: &Path, worktree: &Path) -> Result<Box<dyn Scm>> {
    Ok(Box::new(GitScm::init_detached(repo_path, worktree)?))
}
