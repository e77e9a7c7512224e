//! Request and response shapes, one per endpoint.

use serde::{Deserialize, Serialize};

use crate::backup::BackupSnapshot;
use crate::diff::FileSummary;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    pub file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HashQuery {
    pub hash: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BackupFileQuery {
    pub hash: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyHunksRequest {
    pub hunks: Vec<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManualBackupRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BranchesResponse {
    pub branches: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilesResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiffSummaryResponse {
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppliedFilesResponse {
    pub applied: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupsResponse {
    pub backups: Vec<BackupSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManualBackupResponse {
    pub backup: BackupSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub restored: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}
