//! In-process stand-in for the B2 HTTP API
//!
//! Serves the handful of endpoints [`B2Client`](crate::B2Client) calls from a
//! local axum server, so tests in this and dependent crates exercise the real
//! HTTP paths.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEY_ID: &str = "0012ab34cd";
pub const APP_KEY: &str = "K001-application-key";
pub const BUCKET_NAME: &str = "Team-Sync";
pub const BUCKET_ID: &str = "4a5b6c7d8e9f";
const ACCOUNT_ID: &str = "acct-1";
const ACCOUNT_TOKEN: &str = "account-token";
const UPLOAD_TOKEN: &str = "upload-token";

/// Objects and call counters of a running fake
#[derive(Default)]
pub struct FakeBucket {
    pub base_url: String,
    pub objects: Mutex<BTreeMap<String, (String, Vec<u8>)>>,
    pub auth_calls: AtomicUsize,
    pub bucket_lookups: AtomicUsize,
    pub fail_uploads: AtomicBool,
    pub download_delay: Mutex<Option<Duration>>,
    next_file: AtomicUsize,
}

impl FakeBucket {
    pub fn auth_url(&self) -> String {
        format!("{}/b2api/v2/b2_authorize_account", self.base_url)
    }

    pub fn insert(&self, name: &str, data: &[u8]) {
        let id = format!("file-{}", self.next_file.fetch_add(1, Ordering::SeqCst));
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), (id, data.to_vec()));
    }

    pub fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(name).map(|(_, data)| data.clone())
    }
}

/// Start a fake bucket on an ephemeral local port
pub async fn spawn() -> Arc<FakeBucket> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bucket = Arc::new(FakeBucket {
        base_url: format!("http://{}", listener.local_addr().unwrap()),
        ..Default::default()
    });

    let app = Router::new()
        .route("/b2api/v2/b2_authorize_account", get(authorize))
        .route("/b2api/v2/b2_list_buckets", post(list_buckets))
        .route("/b2api/v2/b2_get_upload_url", post(get_upload_url))
        .route("/b2api/v2/b2_list_file_names", post(list_file_names))
        .route("/b2api/v2/b2_delete_file_version", post(delete_file_version))
        .route("/upload", post(upload))
        .route("/file/:bucket/:name", get(download))
        .with_state(bucket.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    bucket
}

fn has_token(headers: &HeaderMap, token: &str) -> bool {
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(token)
}

fn b2_error(status: StatusCode, code: &str) -> Response {
    let body = json!({ "status": status.as_u16(), "code": code, "message": code });
    (status, Json(body)).into_response()
}

async fn authorize(State(bucket): State<Arc<FakeBucket>>, headers: HeaderMap) -> Response {
    bucket.auth_calls.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Basic {}", STANDARD.encode(format!("{}:{}", KEY_ID, APP_KEY)));
    if !has_token(&headers, &expected) {
        return b2_error(StatusCode::UNAUTHORIZED, "bad_auth_token");
    }
    Json(json!({
        "accountId": ACCOUNT_ID,
        "authorizationToken": ACCOUNT_TOKEN,
        "apiUrl": bucket.base_url,
        "downloadUrl": bucket.base_url,
    }))
    .into_response()
}

async fn list_buckets(
    State(bucket): State<Arc<FakeBucket>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    bucket.bucket_lookups.fetch_add(1, Ordering::SeqCst);
    if !has_token(&headers, ACCOUNT_TOKEN) || body["accountId"] != ACCOUNT_ID {
        return b2_error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    Json(json!({
        "buckets": [
            { "bucketId": "0000archive", "bucketName": "archive" },
            { "bucketId": BUCKET_ID, "bucketName": BUCKET_NAME },
        ]
    }))
    .into_response()
}

async fn get_upload_url(
    State(bucket): State<Arc<FakeBucket>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !has_token(&headers, ACCOUNT_TOKEN) {
        return b2_error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    if body["bucketId"] != BUCKET_ID {
        return b2_error(StatusCode::BAD_REQUEST, "bad_bucket_id");
    }
    Json(json!({
        "bucketId": BUCKET_ID,
        "uploadUrl": format!("{}/upload", bucket.base_url),
        "authorizationToken": UPLOAD_TOKEN,
    }))
    .into_response()
}

async fn upload(State(bucket): State<Arc<FakeBucket>>, headers: HeaderMap, body: Bytes) -> Response {
    if bucket.fail_uploads.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(5000)).into_response();
    }
    if !has_token(&headers, UPLOAD_TOKEN) {
        return b2_error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    if header("x-bz-content-sha1") != hex::encode(Sha1::digest(&body)) {
        return b2_error(StatusCode::BAD_REQUEST, "bad_sha1");
    }
    if header("content-type") != "application/json" {
        return b2_error(StatusCode::BAD_REQUEST, "bad_content_type");
    }

    let name = header("x-bz-file-name");
    bucket.insert(&name, &body);
    Json(json!({ "fileName": name })).into_response()
}

async fn download(
    State(bucket): State<Arc<FakeBucket>>,
    Path((bucket_name, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let delay = *bucket.download_delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if !has_token(&headers, ACCOUNT_TOKEN) {
        return b2_error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    if bucket_name != BUCKET_NAME {
        return b2_error(StatusCode::NOT_FOUND, "not_found");
    }
    match bucket.object(&name) {
        Some(data) => (StatusCode::OK, data).into_response(),
        None => b2_error(StatusCode::NOT_FOUND, "not_found"),
    }
}

async fn list_file_names(
    State(bucket): State<Arc<FakeBucket>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !has_token(&headers, ACCOUNT_TOKEN) || body["bucketId"] != BUCKET_ID {
        return b2_error(StatusCode::BAD_REQUEST, "bad_request");
    }
    let start = body["startFileName"].as_str().unwrap_or_default().to_string();
    let max = body["maxFileCount"].as_u64().unwrap_or(100) as usize;

    let objects = bucket.objects.lock().unwrap();
    let files: Vec<Value> = objects
        .range(start..)
        .take(max)
        .map(|(name, (id, _))| json!({ "fileName": name, "fileId": id }))
        .collect();
    Json(json!({ "files": files, "nextFileName": null })).into_response()
}

async fn delete_file_version(
    State(bucket): State<Arc<FakeBucket>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !has_token(&headers, ACCOUNT_TOKEN) {
        return b2_error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    let name = body["fileName"].as_str().unwrap_or_default();
    let id = body["fileId"].as_str().unwrap_or_default();

    let mut objects = bucket.objects.lock().unwrap();
    match objects.get(name) {
        Some((stored_id, _)) if stored_id == id => {
            objects.remove(name);
            Json(json!({ "fileName": name, "fileId": id })).into_response()
        }
        _ => b2_error(StatusCode::BAD_REQUEST, "file_not_present"),
    }
}
