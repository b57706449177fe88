use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Initiate --

/// Body of `POST /uploads`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub file_name: String,
    pub file_size: u64,
    /// Requested chunk size. The service may answer with a smaller one.
    pub chunk_size: u64,
    /// Lowercase hex SHA-256 of the whole file.
    pub file_digest: String,
    pub mime_type: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateResponse {
    pub session_id: String,
    /// Path or absolute URL that chunk, complete, cancel and status calls hang off.
    pub upload_endpoint: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub expires_at: DateTime<Utc>,
}

// -- Chunks --

/// Acknowledgement for `PUT {endpoint}/chunks/{n}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAck {
    pub chunk_number: u32,
    /// The service already held this chunk; the resend was a no-op.
    #[serde(default)]
    pub already_uploaded: bool,
}

// -- Complete --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub file_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub session_id: String,
    pub file_url: String,
    pub file_size: u64,
    pub completed_at: DateTime<Utc>,
}

// -- Status --

/// Server-side lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Completed,
    Cancelled,
    Expired,
}

impl SessionState {
    /// `true` once no further chunks will be accepted.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub upload_endpoint: String,
    pub chunk_size: u64,
    pub state: SessionState,
    /// Chunk numbers the service has acknowledged, in any order.
    #[serde(default)]
    pub received_chunks: Vec<u32>,
    pub total_chunks: u32,
    pub expires_at: DateTime<Utc>,
}

// -- Errors --

/// Error body returned alongside any non-2xx status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
