//! HTTP surface consumed by the presentation layer.
//!
//! Every handler hands its work to the blocking pool: the service runs git
//! subprocesses and file I/O synchronously. A blocking task runs to
//! completion even when the client goes away, so an abandoned `POST /sync`
//! never leaves the reference checkout half-updated.

mod dto;
mod routes;

pub use dto::*;

use anyhow::Context;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::service::ConfigSyncService;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConfigSyncService>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = format!("{self:#}");

        if status.is_server_error() {
            log::error!("Request failed ({}): {}", self.kind(), message);
        } else {
            log::warn!("Request rejected ({}): {}", self.kind(), message);
        }

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Run a service call on the blocking pool.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, Error>
where
    F: FnOnce(&ConfigSyncService) -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!("Worker task failed: {e}")))?
}

/// Build the router for a service.
pub fn router(service: Arc<ConfigSyncService>) -> Router {
    Router::new()
        .route("/status", get(routes::status))
        .route("/sync", post(routes::sync))
        .route("/branches", get(routes::branches))
        .route("/reference", get(routes::reference))
        .route("/diff", get(routes::diff))
        .route("/apply", post(routes::apply))
        .route("/applyHunks", post(routes::apply_hunks))
        .route("/backups", get(routes::backups))
        .route("/backup", get(routes::backup))
        .route("/backupFileDiff", get(routes::backup_file_diff))
        .route("/backupDownload", get(routes::backup_download))
        .route("/manualBackup", post(routes::manual_backup))
        .route("/restore", post(routes::restore))
        .route("/deleteBackup", post(routes::delete_backup))
        .route("/settings", post(routes::settings))
        .with_state(AppState { service })
}

/// Run background syncs on the configured cadence. The interval is re-read
/// every minute, so settings changes apply without a restart.
pub fn spawn_periodic_sync(service: Arc<ConfigSyncService>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_run = Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let minutes = service.settings().sync_interval;
            if minutes == 0 || last_run.elapsed() < Duration::from_secs(minutes * 60) {
                continue;
            }
            last_run = Instant::now();

            let worker = Arc::clone(&service);
            match tokio::task::spawn_blocking(move || worker.sync()).await {
                Ok(Ok(report)) => log::info!("Periodic sync: {}", report.active_branch),
                Ok(Err(Error::SyncInProgress)) => log::debug!("Periodic sync skipped, sync running"),
                Ok(Err(Error::NotConfigured)) => log::debug!("Periodic sync skipped, not configured"),
                Ok(Err(e)) => log::warn!("Periodic sync failed: {e}"),
                Err(e) => log::error!("Periodic sync task failed: {e}"),
            }
        }
    })
}

/// Serve the HTTP surface until Ctrl-C.
pub async fn serve(listen: &str, service: Arc<ConfigSyncService>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    log::info!("Listening on {}", listener.local_addr()?);

    let periodic = spawn_periodic_sync(Arc::clone(&service));
    let app = router(service);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    periodic.abort();
    Ok(())
}
