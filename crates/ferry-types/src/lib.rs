//! Wire and caller-facing types for resumable chunked uploads.
//!
//! `api` holds the request/response bodies exchanged with the upload service,
//! `models` holds the values handed back to callers (progress, results).

pub mod api;
pub mod models;

pub use api::{
    ChunkAck, CompleteRequest, CompleteResponse, ErrorBody, InitiateRequest, InitiateResponse,
    SessionState, StatusResponse,
};
pub use models::{UploadProgress, UploadResult, UploadStatus};

/// Header carrying the lowercase hex SHA-256 of a chunk body.
pub const CHUNK_DIGEST_HEADER: &str = "x-chunk-digest";

/// Error code the service uses for a digest mismatch.
pub const HASH_MISMATCH_CODE: &str = "hash_mismatch";
