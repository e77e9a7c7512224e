use serde::{Deserialize, Serialize};

use crate::diff::Hunk;

/// One entry of the backup history. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub hash: String,
    pub message: String,
    /// RFC 3339 creation time
    pub timestamp: String,
    pub files_changed: usize,
}

/// Contents of one snapshot, as returned by `GET /backup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDetail {
    pub hash: String,
    pub files: Vec<String>,
    pub changed_files: Vec<String>,
}

/// How a file changed in a snapshot relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupFileStatus {
    Added,
    Deleted,
    Modified,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFileDiff {
    pub file: String,
    pub status: BackupFileStatus,
    pub hunks: Vec<Hunk>,
}
