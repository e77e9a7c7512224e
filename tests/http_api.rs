//! HTTP surface tests, driven through the router without a socket.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{numbered, Device};
use device_config_sync::server::router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn call_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = call(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn app(device: &Device) -> Router {
    router(Arc::new(device.service()))
}

#[tokio::test]
async fn test_status_and_sync() {
    let device = Device::new("3.5.2");
    let app = app(&device);

    let (status, body) = call_json(&app, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detectedVersion"], "3.5.2");
    assert_eq!(body["activeBranch"], "");

    let (status, body) = call_json(&app, "POST", "/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activeBranch"], "3.5");
    assert_eq!(body["exact"], false);
    assert!(body["warning"].as_str().unwrap().contains("3.5.2"));

    let (_, body) = call_json(&app, "GET", "/status", None).await;
    assert_eq!(body["status"], "up_to_date");
    assert_eq!(body["branches"], json!(["3.4", "3.5", "main"]));

    let (_, body) = call_json(&app, "GET", "/branches", None).await;
    assert_eq!(body["branches"], json!(["3.4", "3.5", "main"]));
}

#[tokio::test]
async fn test_diff_and_selective_apply() {
    let device = Device::new("3.5.2");
    let app = app(&device);
    call(&app, "POST", "/sync", None).await;

    let (status, body) = call_json(&app, "GET", "/diff", None).await;
    assert_eq!(status, StatusCode::OK);
    let config = body["files"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["file"] == "sys/config.g")
        .unwrap();
    assert_eq!(config["status"], "modified");
    assert_eq!(config["devicePath"], "0:/sys/config.g");
    assert_eq!(config["hunks"][1]["header"], "@@ -15,6 +15,6 @@");

    let (_, detail) = call_json(&app, "GET", "/diff?file=sys/config.g", None).await;
    assert_eq!(detail["hunks"].as_array().unwrap().len(), 2);
    assert!(detail["unifiedDiff"].as_str().unwrap().contains("+M906 Y800"));

    let (status, body) = call_json(
        &app,
        "POST",
        "/applyHunks?file=sys/config.g",
        Some(json!({ "hunks": [1, 5] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "applied": [1], "failed": [5] }));
    assert_eq!(device.read_live("sys/config.g"), numbered(&[(18, "M906 Y800")]));
}

#[tokio::test]
async fn test_apply_and_backups() {
    let device = Device::new("3.5.2");
    let app = app(&device);
    call(&app, "POST", "/sync", None).await;

    let (status, body) = call_json(&app, "POST", "/apply?file=sys/bed.g", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], json!(["sys/bed.g"]));

    let (_, body) = call_json(&app, "POST", "/apply", None).await;
    assert_eq!(body["applied"], json!(["macros/home.g", "sys/config.g"]));

    let (_, body) = call_json(&app, "GET", "/backups", None).await;
    let backups = body["backups"].as_array().unwrap().clone();
    assert_eq!(backups[0]["message"], "Applied reference 3.5");
    let newest = backups[0]["hash"].as_str().unwrap().to_string();

    let (status, detail) = call_json(&app, "GET", &format!("/backup?hash={newest}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["changedFiles"], json!(["macros/home.g", "sys/config.g"]));

    let (_, diff) = call_json(
        &app,
        "GET",
        &format!("/backupFileDiff?hash={newest}&file=macros/home.g"),
        None,
    )
    .await;
    assert_eq!(diff["status"], "added");

    let (status, body) = call_json(&app, "POST", "/manualBackup", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backup"]["message"], "Manual backup [full]");

    let (status, archive) = call(&app, "GET", &format!("/backupDownload?hash={newest}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(archive.starts_with(b"PK"));
}

#[tokio::test]
async fn test_error_statuses() {
    let device = Device::new("3.5.2");
    let app = app(&device);

    let (status, body) = call_json(&app, "GET", "/diff?file=sys/config.g", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = call_json(&app, "GET", "/backup", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call_json(&app, "GET", "/backup?hash=0123abcd", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(&app, "POST", "/sync", None).await;

    let (status, _) = call_json(
        &app,
        "POST",
        "/apply?file=sys/meltingplot/machine-override.g",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call_json(&app, "POST", "/applyHunks?file=sys/config.g", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    call(&app, "POST", "/manualBackup", Some(json!({ "message": "only" }))).await;
    let (_, body) = call_json(&app, "GET", "/backups", None).await;
    let only = body["backups"][0]["hash"].as_str().unwrap().to_string();
    let (status, _) = call_json(&app, "POST", &format!("/deleteBackup?hash={only}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_settings_update() {
    let device = Device::new("3.5.2");
    let app = app(&device);

    let (status, body) = call_json(
        &app,
        "POST",
        "/settings",
        Some(json!({ "firmwareBranchOverride": "3.4", "syncInterval": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let (_, body) = call_json(&app, "POST", "/sync", None).await;
    assert_eq!(body["activeBranch"], "3.4");
    assert_eq!(body["exact"], true);

    let (status, _) = call_json(&app, "POST", "/settings", Some(json!({ "referenceRepoUrl": "" }))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call_json(&app, "GET", "/status", None).await;
    assert_eq!(body["status"], "not_configured");

    let (status, _) = call_json(&app, "POST", "/sync", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
