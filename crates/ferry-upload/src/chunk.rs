use std::time::Duration;

use bytes::Bytes;
use ferry_types::{CHUNK_DIGEST_HEADER, ChunkAck};
use tracing::{debug, warn};

use crate::backoff::RetryPolicy;
use crate::cancel::CancellationToken;
use crate::error::{ErrorKind, UploadError};
use crate::integrity;
use crate::listener::ChunkReceipt;
use crate::progress::ProgressReporter;
use crate::session::UploadSession;
use crate::transport::{TransportClient, TransportRequest};

/// One slice of the source, ready to send.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub number: u32,
    pub offset: u64,
    pub data: Bytes,
}

/// Sends single chunks with bounded, jittered retries.
#[derive(Clone)]
pub struct ChunkTransmitter {
    transport: TransportClient,
    timeout: Duration,
}

impl ChunkTransmitter {
    pub fn new(transport: TransportClient, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Uploads `chunk` until acknowledged, retrying retryable failures up to
    /// `policy.max_retries` times. Each retry moves `progress` to `retrying`
    /// and notifies its listener before the backoff wait.
    ///
    /// The backoff wait is cut short by `token`; cancellation always surfaces
    /// as `cancelled`, never as the error that triggered the retry.
    pub async fn upload_chunk(
        &self,
        session: &UploadSession,
        chunk: &Chunk,
        policy: &RetryPolicy,
        token: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<ChunkReceipt, UploadError> {
        let digest = integrity::hash(&chunk.data);
        let tag = |e: UploadError| {
            e.with_session(session.session_id.clone())
                .with_chunk(chunk.number)
        };

        let mut attempt = 0u32;
        loop {
            if token.is_cancelled() {
                return Err(tag(UploadError::cancelled()));
            }
            if session.is_expired() {
                return Err(tag(UploadError::new(
                    ErrorKind::SessionExpired,
                    format!("session expired at {}", session.expires_at),
                )));
            }

            let req = TransportRequest::put_bytes(session.chunk_path(chunk.number), chunk.data.clone())
                .header(CHUNK_DIGEST_HEADER, digest.to_hex());
            let sent = self
                .transport
                .send_with_timeout(req, token, self.timeout)
                .await
                .and_then(|r| r.json::<ChunkAck>());

            let err = match sent {
                Ok(ack) => {
                    if ack.chunk_number != chunk.number {
                        warn!(
                            session_id = %session.session_id,
                            sent = chunk.number,
                            acked = ack.chunk_number,
                            "chunk acknowledged under a different number"
                        );
                    }
                    debug!(
                        session_id = %session.session_id,
                        chunk = chunk.number,
                        attempts = attempt + 1,
                        "chunk uploaded"
                    );
                    return Ok(ChunkReceipt {
                        session_id: session.session_id.clone(),
                        chunk_number: chunk.number,
                        offset: chunk.offset,
                        size: chunk.data.len(),
                        digest,
                        already_uploaded: ack.already_uploaded,
                    });
                }
                Err(e) => tag(policy.classify(e)),
            };

            if err.kind.is_network() {
                progress.listener().on_network_error(&err);
            }
            if !should_retry(&err, attempt, policy.max_retries, token) {
                return Err(if token.is_cancelled() {
                    tag(UploadError::cancelled())
                } else {
                    err
                });
            }

            let delay = policy.delay_for(attempt, err.retry_after);
            attempt += 1;
            progress.retrying(&err);
            progress
                .listener()
                .on_retry(attempt, &err, Some(chunk.number));
            debug!(
                chunk = chunk.number,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "backing off"
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(tag(UploadError::cancelled())),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// `attempt` is the number of retries already spent on this chunk.
fn should_retry(
    err: &UploadError,
    attempt: u32,
    max_retries: u32,
    token: &CancellationToken,
) -> bool {
    err.retryable && attempt < max_retries && !token.is_cancelled()
}
