use std::fmt;
use std::time::Duration;

use ferry_types::{ErrorBody, HASH_MISMATCH_CODE};
use serde::{Deserialize, Serialize};

/// Failure classes shared by every component of the upload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection failure, DNS, TLS, no route.
    Network,
    /// 5xx response.
    Server,
    /// Per-call deadline exceeded.
    Timeout,
    /// 429.
    QuotaExceeded,
    /// Any 4xx without a more specific class.
    Client,
    /// 401/403 or no credential available.
    Authentication,
    /// 400 or a locally rejected request.
    Validation,
    /// 413.
    FileTooLarge,
    /// 415.
    UnsupportedFormat,
    /// Digest verification failed.
    HashMismatch,
    /// 410 or the session's `expires_at` has passed.
    SessionExpired,
    /// The caller cancelled the upload.
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Retry eligibility when no policy override applies.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Server | Self::Timeout | Self::QuotaExceeded
        )
    }

    /// `true` for failures of the transport itself, as opposed to a server verdict.
    pub fn is_network(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Server => "server",
            Self::Timeout => "timeout",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Client => "client",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::FileTooLarge => "file_too_large",
            Self::UnsupportedFormat => "unsupported_format",
            Self::HashMismatch => "hash_mismatch",
            Self::SessionExpired => "session_expired",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a non-2xx HTTP status (plus its error body) to a kind.
    pub fn from_http_status(status: u16, body: &ErrorBody) -> Self {
        match status {
            400 if is_digest_mismatch(body) => Self::HashMismatch,
            400 => Self::Validation,
            401 | 403 => Self::Authentication,
            408 => Self::Timeout,
            410 => Self::SessionExpired,
            413 => Self::FileTooLarge,
            415 => Self::UnsupportedFormat,
            429 => Self::QuotaExceeded,
            402..=499 => Self::Client,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_digest_mismatch(body: &ErrorBody) -> bool {
    if body.code.as_deref() == Some(HASH_MISMATCH_CODE) {
        return true;
    }
    body.message.as_deref().is_some_and(|m| {
        let m = m.to_ascii_lowercase();
        m.contains("mismatch")
            && (m.contains("digest") || m.contains("hash") || m.contains("checksum"))
    })
}

/// Error produced at every failure boundary of the upload pipeline.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct UploadError {
    pub kind: ErrorKind,
    pub http_status: Option<u16>,
    pub retryable: bool,
    pub session_id: Option<String>,
    pub chunk_number: Option<u32>,
    /// Server-requested minimum wait before the next attempt.
    pub retry_after: Option<Duration>,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl UploadError {
    /// Creates an error whose retryability follows [`ErrorKind::default_retryable`].
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            http_status: None,
            retryable: kind.default_retryable(),
            session_id: None,
            chunk_number: None,
            retry_after: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "upload cancelled")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Builds an error from a non-2xx response.
    pub fn from_response(status: u16, body: &[u8], retry_after: Option<Duration>) -> Self {
        let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
        let kind = ErrorKind::from_http_status(status, &parsed);
        let message = match (&parsed.message, &parsed.code) {
            (Some(m), _) => m.clone(),
            (None, Some(c)) => c.clone(),
            (None, None) if !body.is_empty() => String::from_utf8_lossy(body).into_owned(),
            (None, None) => format!("HTTP {status}"),
        };
        let mut err = Self::new(kind, message).with_status(status);
        err.retry_after = retry_after;
        err
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_chunk(mut self, chunk_number: u32) -> Self {
        self.chunk_number = Some(chunk_number);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Overrides retryability. A cancellation is never made retryable.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable && self.kind != ErrorKind::Cancelled;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::new(ErrorKind::Unknown, format!("failed to read source: {e}")).with_source(e)
    }
}
