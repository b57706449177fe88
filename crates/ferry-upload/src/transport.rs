use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::RETRY_AFTER;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cancel::{CancelReason, CancellationToken};
use crate::credentials::CredentialProvider;
use crate::error::{ErrorKind, UploadError};

/// Per-call deadline used when the caller does not pass one.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Bytes(Bytes),
}

/// One request to the upload service. `path` is relative to the client's
/// base URL unless it is already absolute.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: RequestBody,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post_json<T: Serialize>(path: impl Into<String>, body: &T) -> Result<Self, UploadError> {
        let value = serde_json::to_value(body).map_err(|e| {
            UploadError::validation(format!("cannot encode request body: {e}")).with_source(e)
        })?;
        Ok(Self {
            body: RequestBody::Json(value),
            ..Self::new(Method::POST, path)
        })
    }

    pub fn put_bytes(path: impl Into<String>, data: Bytes) -> Self {
        Self {
            body: RequestBody::Bytes(data),
            ..Self::new(Method::PUT, path)
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// A 2xx response with its body fully read.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, UploadError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            UploadError::new(
                ErrorKind::Unknown,
                format!("unexpected response body (HTTP {}): {e}", self.status),
            )
            .with_status(self.status)
            .with_source(e)
        })
    }
}

/// Authenticated HTTP client shared by every upload.
///
/// Clones share one connection pool and are safe to use from concurrent
/// uploads.
#[derive(Clone)]
pub struct TransportClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    timeout: Duration,
}

impl TransportClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder().build().map_err(|e| {
            UploadError::new(ErrorKind::Network, format!("cannot build HTTP client: {e}")).with_source(e)
        })?;
        Ok(Self::with_client(http, base_url, credentials))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Sends `req` under the client's default per-call timeout.
    pub async fn send(
        &self,
        req: TransportRequest,
        token: &CancellationToken,
    ) -> Result<TransportResponse, UploadError> {
        self.send_with_timeout(req, token, self.timeout).await
    }

    /// Sends `req`, racing it against `token` and a fresh `timeout`.
    /// The credential fetch runs under the same race.
    ///
    /// Expiry of the timeout yields a retryable `timeout` error; cancellation of
    /// `token` yields `cancelled`. A response that arrives after `token` fired is
    /// discarded.
    pub async fn send_with_timeout(
        &self,
        req: TransportRequest,
        token: &CancellationToken,
        timeout: Duration,
    ) -> Result<TransportResponse, UploadError> {
        if token.is_cancelled() {
            return Err(UploadError::cancelled());
        }

        // One deadline covers the credential fetch and the exchange.
        let call = token.child_with_timeout(timeout);
        let credential = tokio::select! {
            biased;
            _ = call.cancelled() => None,
            c = self.credentials.credential() => Some(c),
        };
        if token.is_cancelled() {
            return Err(UploadError::cancelled());
        }
        let credential = match credential {
            Some(c) => c.ok_or_else(|| {
                UploadError::new(ErrorKind::Authentication, "no credential available")
            })?,
            None => return Err(interrupted(&call, timeout)),
        };

        let url = self.resolve(&req.path);
        let mut builder = self
            .http
            .request(req.method.clone(), &url)
            .bearer_auth(credential);
        for (name, value) in &req.headers {
            builder = builder.header(*name, value);
        }
        builder = match req.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes(data) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data),
        };

        let exchange = async {
            let resp = builder.send().await?;
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.bytes().await?;
            Ok::<_, reqwest::Error>((status, retry_after, body))
        };

        let outcome = tokio::select! {
            biased;
            _ = call.cancelled() => Err(interrupted(&call, timeout)),
            res = exchange => res.map_err(from_reqwest),
        };

        // Cancellation wins over whatever the network produced.
        if token.is_cancelled() {
            return Err(UploadError::cancelled());
        }

        let (status, retry_after, body) = outcome?;
        debug!(method = %req.method, url = %url, status, "upload service responded");

        if (200..300).contains(&status) {
            Ok(TransportResponse { status, body })
        } else {
            Err(UploadError::from_response(status, &body, retry_after))
        }
    }
}

fn interrupted(call: &CancellationToken, timeout: Duration) -> UploadError {
    match call.reason() {
        Some(CancelReason::TimedOut) => UploadError::new(
            ErrorKind::Timeout,
            format!("no response within {}ms", timeout.as_millis()),
        ),
        _ => UploadError::cancelled(),
    }
}

fn from_reqwest(e: reqwest::Error) -> UploadError {
    let kind = if e.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Network
    };
    UploadError::new(kind, e.to_string()).with_source(e)
}
