use std::sync::Arc;
use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::cancel::CancellationToken;
use crate::error::UploadError;
use crate::listener::{NullListener, UploadListener};
use crate::transport::DEFAULT_NETWORK_TIMEOUT;

pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Per-upload settings.
#[derive(Clone)]
pub struct UploadOptions {
    /// Requested chunk size. The service may lower it.
    pub chunk_size: u64,
    pub retry: RetryPolicy,
    /// Deadline for each individual request.
    pub network_timeout: Duration,
    pub mime_type: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Sources larger than this fail locally with `file_too_large`.
    pub max_file_size: Option<u64>,
    pub listener: Arc<dyn UploadListener>,
    pub cancel: CancellationToken,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            metadata: serde_json::Map::new(),
            max_file_size: None,
            listener: Arc::new(NullListener),
            cancel: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("chunk_size", &self.chunk_size)
            .field("retry", &self.retry)
            .field("network_timeout", &self.network_timeout)
            .field("mime_type", &self.mime_type)
            .field("max_file_size", &self.max_file_size)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl UploadOptions {
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = Some(max);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn UploadListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Rejects settings that could never produce a working upload.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::validation("chunk_size must be greater than zero"));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(UploadError::validation(format!(
                "retry backoff multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(UploadError::validation(format!(
                "max retry delay {:?} is below retry delay {:?}",
                self.retry.max_delay, self.retry.base_delay
            )));
        }
        if self.network_timeout.is_zero() {
            return Err(UploadError::validation("network timeout must be non-zero"));
        }
        Ok(())
    }
}
