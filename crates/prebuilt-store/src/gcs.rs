//! Google Cloud Storage backend
//!
//! Uses the JSON API directly over HTTPS:
//! - download: `GET  /storage/v1/b/<bucket>/o/<object>?alt=media`
//! - metadata: `GET  /storage/v1/b/<bucket>/o/<object>`
//! - upload:   `POST /upload/storage/v1/b/<bucket>/o?uploadType=media&name=<object>`
//!
//! Credentials come from the gcloud CLI (`gcloud auth print-access-token`),
//! optionally impersonating a service account. A minted token is reused
//! until the API answers 401, then minted again and the request retried once.
//!
//! GCS answers 404 both for a missing object and for a missing bucket. Only
//! the former is a miss; the latter is reported as unavailable.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};
use ureq::http::Response;
use ureq::{Agent, Body};

use crate::{validate_key, ObjectStore, StoreError, StoreResult};

/// Public GCS endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Upper bound for any single request, including the body transfer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection settings for [`GcsObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsConfig {
    /// Bucket name (without `gs://`)
    pub bucket: String,
    /// Global timeout per request
    pub timeout: Duration,
    /// Service account to impersonate when minting tokens
    pub service_account: Option<String>,
    /// API endpoint, overridable for emulators
    pub endpoint: String,
}

impl GcsConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            timeout: DEFAULT_TIMEOUT,
            service_account: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_service_account(mut self, account: Option<String>) -> Self {
        self.service_account = account;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(key)
        )
    }

    fn download_url(&self, key: &str) -> String {
        format!("{}?alt=media", self.object_url(key))
    }

    fn upload_url(&self, key: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.endpoint,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(key)
        )
    }
}

/// Mints access tokens, given the service account to impersonate.
pub type TokenSource = Box<dyn Fn(Option<&str>) -> StoreResult<String> + Send + Sync>;

#[derive(Debug, Default)]
struct TokenState {
    token: Option<String>,
    /// Supplied by the caller; never re-minted.
    fixed: bool,
}

/// Object store backed by a GCS bucket.
pub struct GcsObjectStore {
    config: GcsConfig,
    agent: Agent,
    token: Mutex<TokenState>,
    token_source: TokenSource,
}

impl GcsObjectStore {
    pub fn new(config: GcsConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            config,
            agent,
            token: Mutex::new(TokenState::default()),
            token_source: Box::new(request_access_token),
        }
    }

    /// Use a pre-minted access token instead of asking gcloud.
    ///
    /// The token is used as is; a 401 is reported as an auth failure.
    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = TokenState {
            token: Some(token.into()),
            fixed: true,
        };
        self
    }

    /// Mint tokens with `source` instead of the gcloud CLI.
    pub fn with_token_source<F>(mut self, source: F) -> Self
    where
        F: Fn(Option<&str>) -> StoreResult<String> + Send + Sync + 'static,
    {
        self.token_source = Box::new(source);
        self
    }

    pub fn config(&self) -> &GcsConfig {
        &self.config
    }

    fn access_token(&self) -> StoreResult<String> {
        let mut state = self.token.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(token) = state.token.as_ref() {
            return Ok(token.clone());
        }

        let token = (self.token_source)(self.config.service_account.as_deref())?;
        state.token = Some(token.clone());
        Ok(token)
    }

    fn authorization(&self) -> StoreResult<String> {
        Ok(format!("Bearer {}", self.access_token()?))
    }

    /// Drop the cached token if it is still `rejected`. Returns `false` for
    /// caller-supplied tokens, which are never replaced.
    fn invalidate_token(&self, rejected: &str) -> bool {
        let mut state = self.token.lock().unwrap_or_else(|p| p.into_inner());
        if state.fixed {
            return false;
        }
        if state
            .token
            .as_deref()
            .is_some_and(|token| rejected.strip_prefix("Bearer ") == Some(token))
        {
            state.token = None;
        }
        true
    }

    /// Send a request built by `request` with the current token, minting a
    /// new token and retrying once if the API answers 401.
    fn send<F>(&self, request: F) -> StoreResult<Response<Body>>
    where
        F: Fn(&str) -> Result<Response<Body>, ureq::Error>,
    {
        let authorization = self.authorization()?;
        let response = request(&authorization).map_err(transport_error)?;
        if response.status().as_u16() != 401 || !self.invalidate_token(&authorization) {
            return Ok(response);
        }

        warn!(bucket = %self.config.bucket, "access token rejected, requesting a new one");
        let authorization = self.authorization()?;
        request(&authorization).map_err(transport_error)
    }

    /// A 404 from a read: `Ok` for a missing object, an error for a
    /// missing bucket.
    fn check_not_found(&self, response: &mut Response<Body>, key: &str) -> StoreResult<()> {
        let body = response.body_mut().read_to_string().unwrap_or_default();
        if is_missing_bucket(&body) {
            return Err(StoreError::Unavailable(format!(
                "bucket {} not found",
                self.config.bucket
            )));
        }
        debug!(key, bucket = %self.config.bucket, "object not found");
        Ok(())
    }
}

impl ObjectStore for GcsObjectStore {
    fn get(&self, key: &str, dest: &Path) -> StoreResult<Option<u64>> {
        validate_key(key)?;
        let url = self.config.download_url(key);

        let mut response = self.send(|authorization| {
            self.agent
                .get(&url)
                .header("Authorization", authorization)
                .call()
        })?;

        match classify_status(response.status().as_u16(), "GET", key)? {
            StatusClass::NotFound => {
                self.check_not_found(&mut response, key)?;
                return Ok(None);
            }
            StatusClass::Ok => {}
        }

        let mut file = File::create(dest)?;
        let bytes = io::copy(&mut response.body_mut().as_reader(), &mut file)?;
        file.sync_all()?;

        info!(key, bytes, bucket = %self.config.bucket, "downloaded object");
        Ok(Some(bytes))
    }

    fn put(&self, key: &str, source: &Path) -> StoreResult<u64> {
        validate_key(key)?;
        let url = self.config.upload_url(key);
        let body = fs::read(source)?;

        let response = self.send(|authorization| {
            self.agent
                .post(&url)
                .header("Authorization", authorization)
                .header("Content-Type", "application/octet-stream")
                .send(&body[..])
        })?;

        match classify_status(response.status().as_u16(), "POST", key)? {
            StatusClass::Ok => {}
            StatusClass::NotFound => {
                return Err(StoreError::Unavailable(format!(
                    "bucket {} not found",
                    self.config.bucket
                )))
            }
        }

        info!(key, bytes = body.len(), bucket = %self.config.bucket, "uploaded object");
        Ok(body.len() as u64)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        let url = self.config.object_url(key);

        let mut response = self.send(|authorization| {
            self.agent
                .get(&url)
                .header("Authorization", authorization)
                .call()
        })?;

        match classify_status(response.status().as_u16(), "GET", key)? {
            StatusClass::Ok => Ok(true),
            StatusClass::NotFound => {
                self.check_not_found(&mut response, key)?;
                Ok(false)
            }
        }
    }

    fn describe(&self) -> String {
        format!("gs://{}", self.config.bucket)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StatusClass {
    Ok,
    NotFound,
}

fn classify_status(status: u16, method: &str, key: &str) -> StoreResult<StatusClass> {
    match status {
        200..=299 => Ok(StatusClass::Ok),
        404 => Ok(StatusClass::NotFound),
        401 | 403 => Err(StoreError::Auth(format!(
            "{} {} returned HTTP {}",
            method, key, status
        ))),
        _ => Err(StoreError::Unavailable(format!(
            "{} {} returned HTTP {}",
            method, key, status
        ))),
    }
}

/// Whether a 404 body says the bucket, not the object, is missing.
///
/// JSON API errors look like
/// `{"error": {"message": "...", "errors": [{"reason": "notFound", ...}]}}`;
/// media downloads may answer with the bare message instead.
fn is_missing_bucket(body: &str) -> bool {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            error
                .get("message")
                .or_else(|| error.pointer("/errors/0/message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
        .to_ascii_lowercase();

    message.contains("bucket does not exist") || message.contains("nosuchbucket")
}

fn transport_error(err: ureq::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Mint an OAuth access token with the gcloud CLI.
fn request_access_token(service_account: Option<&str>) -> StoreResult<String> {
    info!("Requesting GCP access token...");

    let mut cmd = Command::new("gcloud");
    cmd.args(["auth", "print-access-token"]);
    if let Some(account) = service_account {
        cmd.args(["--impersonate-service-account", account]);
    }

    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| StoreError::Auth(format!("failed to run gcloud: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StoreError::Auth(stderr.trim().to_string()));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(StoreError::Auth("gcloud returned an empty token".to_string()));
    }
    Ok(token)
}
