use std::time::Duration;

use chrono::{DateTime, Utc};
use ferry_types::{
    CompleteRequest, CompleteResponse, InitiateRequest, InitiateResponse, StatusResponse,
    UploadResult,
};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::error::{ErrorKind, UploadError};
use crate::integrity::Digest;
use crate::transport::{TransportClient, TransportRequest};

/// Server-issued context for one upload. Immutable once negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: String,
    pub upload_endpoint: String,
    /// Authoritative slice size for every chunk but the last.
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Byte range `(offset, len)` of chunk `n` within a file of `file_size` bytes.
    pub fn chunk_range(&self, n: u32, file_size: u64) -> (u64, usize) {
        let offset = n as u64 * self.chunk_size;
        let len = self.chunk_size.min(file_size.saturating_sub(offset));
        (offset, len as usize)
    }

    pub fn chunk_path(&self, n: u32) -> String {
        format!("{}/chunks/{}", self.upload_endpoint.trim_end_matches('/'), n)
    }

    fn complete_path(&self) -> String {
        format!("{}/complete", self.upload_endpoint.trim_end_matches('/'))
    }
}

/// Number of `chunk_size` slices needed to cover `file_size` bytes.
pub fn expected_chunks(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// What the caller wants to upload, as announced at initiation.
#[derive(Debug, Clone)]
pub struct InitiateParams {
    pub file_name: String,
    pub file_size: u64,
    pub file_digest: Digest,
    pub chunk_size: u64,
    pub mime_type: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Opens, finalizes, cancels and inspects upload sessions.
#[derive(Clone)]
pub struct SessionNegotiator {
    transport: TransportClient,
    timeout: Duration,
}

impl SessionNegotiator {
    pub fn new(transport: TransportClient, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Opens a session. The returned chunk size may be smaller than requested
    /// and must be used for all slicing.
    pub async fn initiate(
        &self,
        params: &InitiateParams,
        token: &CancellationToken,
    ) -> Result<UploadSession, UploadError> {
        let body = InitiateRequest {
            file_name: params.file_name.clone(),
            file_size: params.file_size,
            chunk_size: params.chunk_size,
            file_digest: params.file_digest.to_hex(),
            mime_type: params.mime_type.clone(),
            metadata: params.metadata.clone(),
        };
        let req = TransportRequest::post_json("/uploads", &body)?;
        let resp: InitiateResponse = self
            .transport
            .send_with_timeout(req, token, self.timeout)
            .await?
            .json()?;

        let session = UploadSession {
            session_id: resp.session_id,
            upload_endpoint: resp.upload_endpoint,
            chunk_size: resp.chunk_size,
            total_chunks: resp.total_chunks,
            expires_at: resp.expires_at,
        };

        if let Err(e) = check_negotiated(&session, params) {
            self.cancel(&session).await;
            return Err(e.with_session(session.session_id.clone()));
        }

        info!(
            session_id = %session.session_id,
            chunk_size = session.chunk_size,
            total_chunks = session.total_chunks,
            "upload session opened"
        );
        Ok(session)
    }

    /// Finalizes the session, re-sending the whole-file digest for server-side
    /// verification. A digest mismatch is terminal.
    pub async fn complete(
        &self,
        session: &UploadSession,
        file_digest: &Digest,
        file_size: u64,
        token: &CancellationToken,
    ) -> Result<UploadResult, UploadError> {
        let body = CompleteRequest {
            file_digest: file_digest.to_hex(),
        };
        let req = TransportRequest::post_json(session.complete_path(), &body)?;
        let resp: CompleteResponse = self
            .transport
            .send_with_timeout(req, token, self.timeout)
            .await
            .and_then(|r| r.json())
            .map_err(|e| e.with_session(session.session_id.clone()))?;

        if resp.file_size != file_size {
            return Err(UploadError::new(
                ErrorKind::HashMismatch,
                format!(
                    "service assembled {} bytes, expected {}",
                    resp.file_size, file_size
                ),
            )
            .with_session(session.session_id.clone()));
        }

        Ok(UploadResult {
            session_id: resp.session_id,
            file_url: resp.file_url,
            file_size: resp.file_size,
            completed_at: resp.completed_at,
        })
    }

    /// Best-effort remote cancellation. Never fails from the caller's view;
    /// errors are logged and dropped.
    pub async fn cancel(&self, session: &UploadSession) {
        let token = CancellationToken::with_timeout(self.timeout);
        let req = TransportRequest::delete(session.upload_endpoint.clone());
        match self.transport.send_with_timeout(req, &token, self.timeout).await {
            Ok(_) => info!(session_id = %session.session_id, "upload session cancelled remotely"),
            Err(e) => warn!(
                session_id = %session.session_id,
                kind = %e.kind,
                "remote cancel failed: {}",
                e.message
            ),
        }
    }

    /// Current server-side view of a session, used to resume.
    pub async fn status(
        &self,
        session_id: &str,
        token: &CancellationToken,
    ) -> Result<StatusResponse, UploadError> {
        let req = TransportRequest::get(format!("/uploads/{session_id}"));
        self.transport
            .send_with_timeout(req, token, self.timeout)
            .await
            .and_then(|r| r.json())
            .map_err(|e| e.with_session(session_id))
    }
}

fn check_negotiated(session: &UploadSession, params: &InitiateParams) -> Result<(), UploadError> {
    if session.chunk_size == 0 || session.chunk_size > params.chunk_size {
        return Err(UploadError::validation(format!(
            "service chose chunk size {} for requested {}",
            session.chunk_size, params.chunk_size
        )));
    }
    let expected = expected_chunks(params.file_size, session.chunk_size);
    if session.total_chunks as u64 != expected {
        return Err(UploadError::validation(format!(
            "service announced {} chunks, {} bytes at {} per chunk needs {}",
            session.total_chunks, params.file_size, session.chunk_size, expected
        )));
    }
    Ok(())
}
