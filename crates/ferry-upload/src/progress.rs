use std::sync::Arc;
use std::time::Duration;

use ferry_types::{UploadProgress, UploadStatus};
use tokio::time::Instant;

use crate::error::UploadError;
use crate::listener::UploadListener;
use crate::session::UploadSession;

/// Bytes per second over `elapsed`, 0 when no time has passed.
pub fn throughput(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 { 0.0 } else { bytes as f64 / secs }
}

/// Whole seconds left at `speed` bytes/s, `None` while speed is unknown.
pub fn eta_seconds(remaining: u64, speed: f64) -> Option<u64> {
    if speed <= 0.0 {
        return None;
    }
    Some((remaining as f64 / speed).ceil() as u64)
}

/// Owns the single [`UploadProgress`] of one upload and emits it on every change.
pub struct ProgressReporter {
    listener: Arc<dyn UploadListener>,
    started: Option<Instant>,
    /// Bytes actually sent in this run; skipped chunks do not count toward speed.
    sent_bytes: u64,
    state: UploadProgress,
}

impl ProgressReporter {
    pub fn new(listener: Arc<dyn UploadListener>, total_bytes: u64) -> Self {
        Self {
            listener,
            started: None,
            sent_bytes: 0,
            state: UploadProgress {
                session_id: None,
                progress_percent: 0.0,
                uploaded_bytes: 0,
                total_bytes,
                uploaded_chunks: 0,
                total_chunks: 0,
                upload_speed_bytes_per_sec: 0.0,
                estimated_seconds_remaining: None,
                status: UploadStatus::Pending,
                retry_count: 0,
                last_error_message: None,
            },
        }
    }

    pub fn snapshot(&self) -> &UploadProgress {
        &self.state
    }

    pub fn status(&self) -> UploadStatus {
        self.state.status
    }

    pub fn listener(&self) -> &dyn UploadListener {
        self.listener.as_ref()
    }

    /// Emits the initial `pending` snapshot.
    pub fn pending(&mut self) {
        self.emit();
    }

    /// `pending → uploading` once a session exists.
    pub fn start(&mut self, session: &UploadSession) {
        self.state.session_id = Some(session.session_id.clone());
        self.state.total_chunks = session.total_chunks;
        self.state.status = UploadStatus::Uploading;
        self.started = Some(Instant::now());
        self.emit();
    }

    /// Counts an acknowledged chunk of `bytes`.
    pub fn chunk_done(&mut self, bytes: u64) {
        self.sent_bytes += bytes;
        self.add_chunk(bytes);
        self.state.status = UploadStatus::Uploading;
        self.emit();
    }

    /// Counts a chunk the service already held before this run started.
    pub fn chunk_skipped(&mut self, bytes: u64) {
        self.add_chunk(bytes);
        self.emit();
    }

    fn add_chunk(&mut self, bytes: u64) {
        let s = &mut self.state;
        s.uploaded_chunks = (s.uploaded_chunks + 1).min(s.total_chunks);
        s.uploaded_bytes = (s.uploaded_bytes + bytes).min(s.total_bytes);
    }

    /// `uploading → retrying` after a retryable failure.
    pub fn retrying(&mut self, error: &UploadError) {
        self.state.retry_count += 1;
        self.state.last_error_message = Some(error.to_string());
        self.state.status = UploadStatus::Retrying;
        self.emit();
    }

    /// Terminal transition. `completed` pins progress at 100%.
    pub fn finish(&mut self, status: UploadStatus, error: Option<&UploadError>) {
        debug_assert!(status.is_terminal());
        if let Some(e) = error {
            self.state.last_error_message = Some(e.to_string());
        }
        if status == UploadStatus::Completed {
            self.state.uploaded_bytes = self.state.total_bytes;
            self.state.uploaded_chunks = self.state.total_chunks;
        }
        self.state.status = status;
        self.emit();
    }

    fn emit(&mut self) {
        let s = &mut self.state;
        s.progress_percent = if s.total_bytes == 0 {
            0.0
        } else {
            s.uploaded_bytes as f64 * 100.0 / s.total_bytes as f64
        };
        let elapsed = self.started.map(|t| t.elapsed()).unwrap_or_default();
        s.upload_speed_bytes_per_sec = throughput(self.sent_bytes, elapsed);
        s.estimated_seconds_remaining = if s.status.is_terminal() {
            Some(0)
        } else {
            eta_seconds(s.total_bytes - s.uploaded_bytes, s.upload_speed_bytes_per_sec)
        };
        self.listener.on_progress(s);
    }
}
