//! B2 client for snapshot upload, download, and delete
//!
//! Session state (token, account, URLs, bucket id) is cached on the client
//! behind its own lock. Callers should not hold the registry lock while any
//! of these calls are in flight.

use chrono::{DateTime, Utc};
use keyswitch_core::RemoteSyncSettings;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::context::RequestContext;
use crate::error::{B2Error, Result};
use crate::naming::sanitize_object_key;

/// Production account authorization endpoint
pub const DEFAULT_AUTH_URL: &str = "https://api.backblazeb2.com/b2api/v2/b2_authorize_account";

/// Tokens are valid for 24h; assume a little less
const TOKEN_LIFETIME: Duration = Duration::from_secs(22 * 60 * 60);
const REFRESH_MARGIN: Duration = Duration::from_secs(2 * 60);

/// Upper bound on error bodies read back from the provider
const ERROR_BODY_LIMIT: usize = 4096;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Session {
    account_id: String,
    auth_token: String,
    api_url: String,
    download_url: String,
    expires_at: Option<Instant>,
    bucket_id: String,
    last_sync: Option<DateTime<Utc>>,
}

impl Session {
    fn token_is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) if !self.auth_token.is_empty() => {
                expires_at.saturating_duration_since(Instant::now()) > REFRESH_MARGIN
            }
            _ => false,
        }
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            account_id: self.account_id.clone(),
            auth_token: self.auth_token.clone(),
            api_url: self.api_url.clone(),
            download_url: self.download_url.clone(),
        }
    }
}

/// Copy of the session taken so network calls run without the session lock
struct Credentials {
    account_id: String,
    auth_token: String,
    api_url: String,
    download_url: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AuthorizeResponse {
    account_id: String,
    authorization_token: String,
    api_url: String,
    download_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsRequest<'a> {
    account_id: &'a str,
    bucket_name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketEntry {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Deserialize)]
struct ListBucketsResponse {
    #[serde(default)]
    buckets: Vec<BucketEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetUploadUrlRequest<'a> {
    bucket_id: &'a str,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListFileNamesRequest<'a> {
    bucket_id: &'a str,
    start_file_name: &'a str,
    max_file_count: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    file_name: String,
    file_id: String,
}

#[derive(Deserialize)]
struct ListFileNamesResponse {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteFileVersionRequest<'a> {
    file_name: &'a str,
    file_id: &'a str,
}

/// Minimal B2 client bound to one bucket
pub struct B2Client {
    http: Client,
    auth_url: String,
    key_id: String,
    application_key: String,
    bucket_name: String,
    api_url_override: Option<String>,
    download_url_override: Option<String>,
    session: Mutex<Session>,
}

impl B2Client {
    /// Create a client for the production endpoint
    pub fn new(settings: &RemoteSyncSettings) -> Result<Self> {
        Self::with_auth_url(settings, DEFAULT_AUTH_URL)
    }

    /// Create a client that authorizes against `auth_url`
    pub fn with_auth_url(settings: &RemoteSyncSettings, auth_url: &str) -> Result<Self> {
        let key_id = settings.key_id.trim();
        let application_key = settings.application_key.trim();
        if key_id.is_empty() || application_key.is_empty() {
            return Err(B2Error::Validation(
                "B2 key id and application key are required".to_string(),
            ));
        }
        let bucket_name = settings.bucket_name.trim();
        if bucket_name.is_empty() {
            return Err(B2Error::Validation("B2 bucket name is required".to_string()));
        }
        Url::parse(auth_url)?;

        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(Self {
            http,
            auth_url: auth_url.to_string(),
            key_id: key_id.to_string(),
            application_key: application_key.to_string(),
            bucket_name: bucket_name.to_string(),
            api_url_override: non_blank(&settings.api_url),
            download_url_override: non_blank(&settings.download_url),
            session: Mutex::new(Session {
                bucket_id: settings.bucket_id.trim().to_string(),
                last_sync: settings.last_sync,
                ..Default::default()
            }),
        })
    }

    /// Authorize and resolve the bucket id. Cheap once both are cached.
    pub async fn prepare(&self, ctx: &RequestContext) -> Result<()> {
        ctx.run("prepare", async {
            let credentials = self.ensure_authorized().await?;
            self.ensure_bucket_id(&credentials).await?;
            Ok(())
        })
        .await
    }

    /// Upload `data` as object `key`
    pub async fn upload(&self, ctx: &RequestContext, key: &str, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(B2Error::Validation("upload payload is empty".to_string()));
        }
        let key = sanitize_object_key(key);

        ctx.run("upload", async {
            let credentials = self.ensure_authorized().await?;
            let bucket_id = self.ensure_bucket_id(&credentials).await?;

            let target: UploadUrlResponse = self
                .call_api(
                    &credentials,
                    "b2_get_upload_url",
                    &GetUploadUrlRequest {
                        bucket_id: &bucket_id,
                    },
                )
                .await?;
            if target.upload_url.is_empty() || target.authorization_token.is_empty() {
                return Err(B2Error::Remote {
                    operation: "b2_get_upload_url",
                    status: StatusCode::OK.as_u16(),
                    body: "response is missing uploadUrl or authorizationToken".to_string(),
                });
            }

            let digest = hex::encode(Sha1::digest(data));
            let response = self
                .http
                .post(&target.upload_url)
                .header(AUTHORIZATION, target.authorization_token.as_str())
                .header("X-Bz-File-Name", key.as_str())
                .header(CONTENT_TYPE, "application/json")
                .header("X-Bz-Content-Sha1", digest)
                .body(data.to_vec())
                .send()
                .await?;
            check_status("b2_upload_file", response).await?;

            self.session.lock().await.last_sync = Some(Utc::now());
            info!("Uploaded {} ({} bytes) to bucket {}", key, data.len(), self.bucket_name);
            Ok(())
        })
        .await
    }

    /// Download object `key`
    pub async fn download(&self, ctx: &RequestContext, key: &str) -> Result<Vec<u8>> {
        let key = sanitize_object_key(key);

        ctx.run("download", async {
            let credentials = self.ensure_authorized().await?;
            let url = file_url(&credentials.download_url, &self.bucket_name, &key)?;

            let response = self
                .http
                .get(url)
                .header(AUTHORIZATION, credentials.auth_token.as_str())
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(B2Error::NotFound(format!(
                    "object {} in bucket {}",
                    key, self.bucket_name
                )));
            }
            let response = check_status("b2_download_file_by_name", response).await?;
            let data = response.bytes().await?;

            debug!("Downloaded {} ({} bytes)", key, data.len());
            Ok(data.to_vec())
        })
        .await
    }

    /// Delete object `key`. A missing object is not an error.
    pub async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        let key = sanitize_object_key(key);

        ctx.run("delete", async {
            let credentials = self.ensure_authorized().await?;
            let bucket_id = self.ensure_bucket_id(&credentials).await?;

            let listing: ListFileNamesResponse = self
                .call_api(
                    &credentials,
                    "b2_list_file_names",
                    &ListFileNamesRequest {
                        bucket_id: &bucket_id,
                        start_file_name: &key,
                        max_file_count: 1,
                    },
                )
                .await?;
            let Some(file) = listing.files.into_iter().find(|f| f.file_name == key) else {
                debug!("Object {} not present, nothing to delete", key);
                return Ok(());
            };

            let _: serde_json::Value = self
                .call_api(
                    &credentials,
                    "b2_delete_file_version",
                    &DeleteFileVersionRequest {
                        file_name: &key,
                        file_id: &file.file_id,
                    },
                )
                .await?;

            info!("Deleted {} from bucket {}", key, self.bucket_name);
            Ok(())
        })
        .await
    }

    /// Resolved bucket id, if known
    pub async fn bucket_id(&self) -> Option<String> {
        let session = self.session.lock().await;
        (!session.bucket_id.is_empty()).then(|| session.bucket_id.clone())
    }

    /// Time of the last successful upload
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.session.lock().await.last_sync
    }

    /// Copy the resolved bucket id and last sync time into `settings`
    pub async fn write_back(&self, settings: &mut RemoteSyncSettings) {
        let session = self.session.lock().await;
        if !session.bucket_id.is_empty() {
            settings.bucket_id = session.bucket_id.clone();
        }
        if session.last_sync.is_some() {
            settings.last_sync = session.last_sync;
        }
    }

    async fn ensure_authorized(&self) -> Result<Credentials> {
        let mut session = self.session.lock().await;
        if session.token_is_fresh() {
            return Ok(session.credentials());
        }

        debug!("Authorizing B2 key {}", self.key_id);
        let response = self
            .http
            .get(&self.auth_url)
            .basic_auth(&self.key_id, Some(&self.application_key))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_bounded(response).await;
            return Err(B2Error::Auth(format!("HTTP {}: {}", status, body)));
        }

        let auth: AuthorizeResponse = decode_json(response).await?;
        let api_url = self.api_url_override.clone().unwrap_or(auth.api_url);
        let download_url = self.download_url_override.clone().unwrap_or(auth.download_url);
        if auth.account_id.is_empty()
            || auth.authorization_token.is_empty()
            || api_url.is_empty()
            || download_url.is_empty()
        {
            return Err(B2Error::Auth("incomplete authorization response".to_string()));
        }

        session.account_id = auth.account_id;
        session.auth_token = auth.authorization_token;
        session.api_url = api_url;
        session.download_url = download_url;
        session.expires_at = Some(Instant::now() + TOKEN_LIFETIME);

        info!("Authorized B2 account {}", session.account_id);
        Ok(session.credentials())
    }

    async fn ensure_bucket_id(&self, credentials: &Credentials) -> Result<String> {
        {
            let session = self.session.lock().await;
            if !session.bucket_id.is_empty() {
                return Ok(session.bucket_id.clone());
            }
        }

        let listing: ListBucketsResponse = self
            .call_api(
                credentials,
                "b2_list_buckets",
                &ListBucketsRequest {
                    account_id: &credentials.account_id,
                    bucket_name: &self.bucket_name,
                },
            )
            .await?;

        let bucket = listing
            .buckets
            .into_iter()
            .find(|b| b.bucket_name.eq_ignore_ascii_case(&self.bucket_name))
            .ok_or_else(|| B2Error::NotFound(format!("bucket {}", self.bucket_name)))?;

        debug!("Resolved bucket {} to {}", self.bucket_name, bucket.bucket_id);
        self.session.lock().await.bucket_id = bucket.bucket_id.clone();
        Ok(bucket.bucket_id)
    }

    async fn call_api<T, B>(&self, credentials: &Credentials, endpoint: &'static str, payload: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let url = format!(
            "{}/b2api/v2/{}",
            credentials.api_url.trim_end_matches('/'),
            endpoint
        );
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, credentials.auth_token.as_str())
            .json(payload)
            .send()
            .await?;
        let response = check_status(endpoint, response).await?;
        decode_json(response).await
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `<download url>/file/<bucket>/<key>` with each segment percent-encoded
fn file_url(download_url: &str, bucket: &str, key: &str) -> Result<Url> {
    let mut url = Url::parse(download_url)?;
    url.path_segments_mut()
        .map_err(|_| B2Error::Validation(format!("download URL {} cannot carry a path", download_url)))?
        .pop_if_empty()
        .push("file")
        .push(bucket)
        .push(key);
    Ok(url)
}

async fn check_status(operation: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_bounded(response).await;
    Err(B2Error::Remote {
        operation,
        status: status.as_u16(),
        body,
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Read at most [`ERROR_BODY_LIMIT`] bytes of an error body
async fn read_bounded(mut response: Response) -> String {
    let mut body = Vec::new();
    while body.len() < ERROR_BODY_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            _ => break,
        }
    }
    body.truncate(ERROR_BODY_LIMIT);
    String::from_utf8_lossy(&body).trim().to_string()
}
