//! Upload observation hooks.
//!
//! The orchestrator reports every state change through an [`UploadListener`].
//! Implementations can forward to a UI, write to tracing, or discard.

use ferry_types::UploadProgress;

use crate::error::UploadError;
use crate::integrity::Digest;

/// A chunk the service has acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub session_id: String,
    pub chunk_number: u32,
    pub offset: u64,
    pub size: usize,
    pub digest: Digest,
    /// The service already held the chunk; the resend was a no-op.
    pub already_uploaded: bool,
}

/// Callbacks invoked during an upload. All methods default to no-ops.
///
/// Called inline on the upload task; keep them cheap.
pub trait UploadListener: Send + Sync {
    /// Every status transition and every acknowledged chunk.
    fn on_progress(&self, _progress: &UploadProgress) {}

    /// After each chunk succeeds. Intended for checkpointing.
    fn on_chunk_complete(&self, _receipt: &ChunkReceipt) {}

    /// Retry `attempt` (1-based) has been decided. Fires before the backoff
    /// delay starts; the request is re-sent once the delay has elapsed.
    fn on_retry(&self, _attempt: u32, _error: &UploadError, _chunk_number: Option<u32>) {}

    /// Whenever a request fails at the transport level (network or timeout).
    fn on_network_error(&self, _error: &UploadError) {}
}

/// Listener that writes to `tracing`.
pub struct TracingListener;

impl UploadListener for TracingListener {
    fn on_progress(&self, p: &UploadProgress) {
        // Lifecycle transitions at info, per-chunk ticks at debug.
        if p.status.is_terminal() || p.uploaded_chunks == 0 {
            tracing::info!(
                session_id = p.session_id.as_deref().unwrap_or("-"),
                status = %p.status,
                uploaded_bytes = p.uploaded_bytes,
                total_bytes = p.total_bytes,
                "upload {}",
                p.status,
            );
        } else {
            tracing::debug!(
                session_id = p.session_id.as_deref().unwrap_or("-"),
                status = %p.status,
                chunks = p.uploaded_chunks,
                total_chunks = p.total_chunks,
                speed_bps = p.upload_speed_bytes_per_sec as u64,
                eta_secs = p.estimated_seconds_remaining,
                "progress {:.1}%",
                p.progress_percent,
            );
        }
    }

    fn on_chunk_complete(&self, r: &ChunkReceipt) {
        tracing::debug!(
            session_id = %r.session_id,
            chunk = r.chunk_number,
            size = r.size,
            already_uploaded = r.already_uploaded,
            "chunk acknowledged"
        );
    }

    fn on_retry(&self, attempt: u32, error: &UploadError, chunk_number: Option<u32>) {
        tracing::warn!(
            attempt,
            chunk = chunk_number,
            kind = %error.kind,
            "retrying after error: {}",
            error.message,
        );
    }

    fn on_network_error(&self, error: &UploadError) {
        tracing::debug!(kind = %error.kind, "network error: {}", error.message);
    }
}

/// Listener that discards everything.
pub struct NullListener;

impl UploadListener for NullListener {}

type ProgressFn = Box<dyn Fn(&UploadProgress) + Send + Sync>;
type ChunkFn = Box<dyn Fn(&ChunkReceipt) + Send + Sync>;
type RetryFn = Box<dyn Fn(u32, &UploadError, Option<u32>) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&UploadError) + Send + Sync>;

/// Closure-based listener for callers that only care about a few hooks.
#[derive(Default)]
pub struct Callbacks {
    on_progress: Option<ProgressFn>,
    on_chunk_complete: Option<ChunkFn>,
    on_retry: Option<RetryFn>,
    on_network_error: Option<ErrorFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, f: impl Fn(&UploadProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn with_chunk_complete(mut self, f: impl Fn(&ChunkReceipt) + Send + Sync + 'static) -> Self {
        self.on_chunk_complete = Some(Box::new(f));
        self
    }

    pub fn with_retry(
        mut self,
        f: impl Fn(u32, &UploadError, Option<u32>) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Box::new(f));
        self
    }

    pub fn with_network_error(mut self, f: impl Fn(&UploadError) + Send + Sync + 'static) -> Self {
        self.on_network_error = Some(Box::new(f));
        self
    }
}

impl UploadListener for Callbacks {
    fn on_progress(&self, progress: &UploadProgress) {
        if let Some(f) = &self.on_progress {
            f(progress);
        }
    }

    fn on_chunk_complete(&self, receipt: &ChunkReceipt) {
        if let Some(f) = &self.on_chunk_complete {
            f(receipt);
        }
    }

    fn on_retry(&self, attempt: u32, error: &UploadError, chunk_number: Option<u32>) {
        if let Some(f) = &self.on_retry {
            f(attempt, error, chunk_number);
        }
    }

    fn on_network_error(&self, error: &UploadError) {
        if let Some(f) = &self.on_network_error {
            f(error);
        }
    }
}
