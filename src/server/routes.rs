use axum::{
    body::Bytes,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;

use super::dto::*;
use super::{blocking, AppState};
use crate::backup::short;
use crate::diff::FileDetail;
use crate::error::Error;
use crate::patch::HunkApplyResult;
use crate::service::{StatusReport, SyncReport};
use crate::settings::SettingsUpdate;

type ApiResult<T> = Result<Json<T>, Error>;

fn required(value: Option<String>, name: &str) -> Result<String, Error> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidRequest(format!("Missing '{name}' parameter")))
}

/// Parse a JSON body; an empty body yields the default when there is one.
fn parse_body<T: DeserializeOwned>(body: &[u8], default: Option<T>) -> Result<T, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return default.ok_or_else(|| Error::InvalidRequest("Request body required".to_string()));
    }
    serde_json::from_slice(body).map_err(|e| Error::InvalidRequest(format!("Invalid body: {e}")))
}

pub async fn status(State(state): State<AppState>) -> ApiResult<StatusReport> {
    blocking(&state, |s| s.status()).await.map(Json)
}

pub async fn sync(State(state): State<AppState>) -> ApiResult<SyncReport> {
    blocking(&state, |s| s.sync()).await.map(Json)
}

pub async fn branches(State(state): State<AppState>) -> ApiResult<BranchesResponse> {
    let branches = blocking(&state, |s| s.branches()).await?;
    Ok(Json(BranchesResponse { branches }))
}

pub async fn reference(State(state): State<AppState>) -> ApiResult<FilesResponse> {
    let files = blocking(&state, |s| s.reference_files()).await?;
    Ok(Json(FilesResponse { files }))
}

/// Summary of every file, or detail of one with `?file=`.
pub async fn diff(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Response, Error> {
    match query.file.filter(|f| !f.trim().is_empty()) {
        Some(file) => {
            let detail: FileDetail = blocking(&state, move |s| s.diff_file(&file)).await?;
            Ok(Json(detail).into_response())
        }
        None => {
            let files = blocking(&state, |s| s.diff_summary()).await?;
            Ok(Json(DiffSummaryResponse { files }).into_response())
        }
    }
}

/// Apply everything, or one file with `?file=`.
pub async fn apply(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<AppliedFilesResponse> {
    let applied = match query.file.filter(|f| !f.trim().is_empty()) {
        Some(file) => blocking(&state, move |s| s.apply_file(&file)).await?,
        None => blocking(&state, |s| s.apply_all()).await?,
    };
    Ok(Json(AppliedFilesResponse { applied }))
}

pub async fn apply_hunks(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
    body: Bytes,
) -> ApiResult<HunkApplyResult> {
    let file = required(query.file, "file")?;
    let request: ApplyHunksRequest = parse_body(&body, None)?;
    blocking(&state, move |s| s.apply_hunks(&file, &request.hunks))
        .await
        .map(Json)
}

pub async fn backups(State(state): State<AppState>) -> ApiResult<BackupsResponse> {
    let backups = blocking(&state, |s| s.backups()).await?;
    Ok(Json(BackupsResponse { backups }))
}

pub async fn backup(
    State(state): State<AppState>,
    Query(query): Query<HashQuery>,
) -> ApiResult<crate::backup::BackupDetail> {
    let hash = required(query.hash, "hash")?;
    blocking(&state, move |s| s.backup_detail(&hash))
        .await
        .map(Json)
}

pub async fn backup_file_diff(
    State(state): State<AppState>,
    Query(query): Query<BackupFileQuery>,
) -> ApiResult<crate::backup::BackupFileDiff> {
    let hash = required(query.hash, "hash")?;
    let file = required(query.file, "file")?;
    blocking(&state, move |s| s.backup_file_diff(&hash, &file))
        .await
        .map(Json)
}

pub async fn backup_download(
    State(state): State<AppState>,
    Query(query): Query<HashQuery>,
) -> Result<Response, Error> {
    let hash = required(query.hash, "hash")?;
    let (full_hash, archive) = blocking(&state, move |s| s.backup_archive(&hash)).await?;

    let disposition = format!("attachment; filename=\"config-backup-{}.zip\"", short(&full_hash));
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive,
    )
        .into_response())
}

pub async fn manual_backup(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<ManualBackupResponse> {
    let request: ManualBackupRequest = parse_body(&body, Some(ManualBackupRequest::default()))?;
    let backup = blocking(&state, move |s| s.manual_backup(request.message.as_deref())).await?;
    Ok(Json(ManualBackupResponse { backup }))
}

pub async fn restore(
    State(state): State<AppState>,
    Query(query): Query<HashQuery>,
) -> ApiResult<RestoreResponse> {
    let hash = required(query.hash, "hash")?;
    let restored = blocking(&state, move |s| s.restore(&hash)).await?;
    Ok(Json(RestoreResponse { restored }))
}

pub async fn delete_backup(
    State(state): State<AppState>,
    Query(query): Query<HashQuery>,
) -> ApiResult<DeleteResponse> {
    let hash = required(query.hash, "hash")?;
    let deleted = blocking(&state, move |s| s.delete_backup(&hash)).await?;
    Ok(Json(DeleteResponse { deleted }))
}

pub async fn settings(State(state): State<AppState>, body: Bytes) -> ApiResult<OkResponse> {
    let update: SettingsUpdate = parse_body(&body, None)?;
    blocking(&state, move |s| s.update_settings(&update)).await?;
    Ok(Json(OkResponse { ok: true }))
}
