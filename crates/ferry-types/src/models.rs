use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one upload as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot emitted to the caller on every state change of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    /// `None` until the session has been negotiated.
    pub session_id: Option<String>,
    pub progress_percent: f64,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub upload_speed_bytes_per_sec: f64,
    /// `None` while throughput is still unknown.
    pub estimated_seconds_remaining: Option<u64>,
    pub status: UploadStatus,
    pub retry_count: u32,
    pub last_error_message: Option<String>,
}

/// Outcome of a successfully finalized upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub session_id: String,
    pub file_url: String,
    pub file_size: u64,
    pub completed_at: DateTime<Utc>,
}
