use std::collections::BTreeSet;

use chrono::Utc;
use ferry_types::{UploadResult, UploadStatus};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::chunk::{Chunk, ChunkTransmitter};
use crate::config::UploadOptions;
use crate::error::{ErrorKind, UploadError};
use crate::integrity::{self, Digest};
use crate::progress::ProgressReporter;
use crate::session::{InitiateParams, SessionNegotiator, UploadSession, expected_chunks};
use crate::source::ByteSource;
use crate::transport::TransportClient;

enum Start<'a> {
    Initiate { file_name: &'a str },
    Resume { session_id: &'a str },
}

/// Drives one upload from negotiation to a terminal status.
///
/// Chunks go out strictly in order, one at a time. The orchestrator is
/// stateless between calls; every `upload` owns its own progress and session.
#[derive(Clone)]
pub struct UploadOrchestrator {
    transport: TransportClient,
}

impl UploadOrchestrator {
    pub fn new(transport: TransportClient) -> Self {
        Self { transport }
    }

    /// Uploads `source` as `file_name` in a new session.
    pub async fn upload<S: ByteSource>(
        &self,
        source: &S,
        file_name: &str,
        options: &UploadOptions,
    ) -> Result<UploadResult, UploadError> {
        self.drive(source, options, Start::Initiate { file_name }).await
    }

    /// Continues an interrupted session, sending only the chunks the service
    /// has not acknowledged. `source` must hold the same bytes as before.
    pub async fn resume<S: ByteSource>(
        &self,
        session_id: &str,
        source: &S,
        options: &UploadOptions,
    ) -> Result<UploadResult, UploadError> {
        self.drive(source, options, Start::Resume { session_id }).await
    }

    async fn drive<S: ByteSource>(
        &self,
        source: &S,
        options: &UploadOptions,
        start: Start<'_>,
    ) -> Result<UploadResult, UploadError> {
        let negotiator = SessionNegotiator::new(self.transport.clone(), options.network_timeout);
        let mut progress = ProgressReporter::new(options.listener.clone(), source.len());
        progress.pending();

        let mut session = None;
        let outcome = self
            .run(source, options, start, &negotiator, &mut progress, &mut session)
            .await;
        let session_id = session.as_ref().map(|s| s.session_id.as_str()).unwrap_or("-");

        match outcome {
            Ok(result) => {
                progress.finish(UploadStatus::Completed, None);
                info!(session_id, file_url = %result.file_url, "upload completed");
                Ok(result)
            }
            Err(e) if e.is_cancelled() || options.cancel.is_cancelled() => {
                if let Some(s) = &session {
                    negotiator.cancel(s).await;
                }
                progress.finish(UploadStatus::Cancelled, None);
                info!(session_id, "upload cancelled");
                let mut err = UploadError::cancelled();
                err.session_id = session.map(|s| s.session_id);
                Err(err)
            }
            Err(e) => {
                progress.finish(UploadStatus::Failed, Some(&e));
                info!(
                    session_id,
                    kind = %e.kind,
                    chunk = e.chunk_number,
                    "upload failed: {}",
                    e.message
                );
                Err(e)
            }
        }
    }

    async fn run<S: ByteSource>(
        &self,
        source: &S,
        options: &UploadOptions,
        start: Start<'_>,
        negotiator: &SessionNegotiator,
        progress: &mut ProgressReporter,
        slot: &mut Option<UploadSession>,
    ) -> Result<UploadResult, UploadError> {
        let token = &options.cancel;
        options.validate()?;
        preflight(source.len(), options)?;

        let digest = integrity::hash_source(source, token).await?;
        ensure_live(token)?;

        let (session, received) = match start {
            Start::Initiate { file_name } => {
                let params = InitiateParams {
                    file_name: file_name.to_string(),
                    file_size: source.len(),
                    file_digest: digest,
                    chunk_size: options.chunk_size,
                    mime_type: options.mime_type.clone(),
                    metadata: options.metadata.clone(),
                };
                (negotiator.initiate(&params, token).await?, BTreeSet::new())
            }
            Start::Resume { session_id } => reopen(negotiator, session_id, source.len(), token).await?,
        };
        let session = slot.insert(session);
        ensure_live(token)?;

        progress.start(session);
        self.transfer(session, source, &received, options, progress)
            .await?;
        ensure_live(token)?;

        self.finalize(negotiator, session, &digest, source.len(), token)
            .await
    }

    async fn transfer<S: ByteSource>(
        &self,
        session: &UploadSession,
        source: &S,
        received: &BTreeSet<u32>,
        options: &UploadOptions,
        progress: &mut ProgressReporter,
    ) -> Result<(), UploadError> {
        let token = &options.cancel;
        let transmitter = ChunkTransmitter::new(self.transport.clone(), options.network_timeout);

        for number in 0..session.total_chunks {
            ensure_live(token)?;
            let (offset, len) = session.chunk_range(number, source.len());

            if received.contains(&number) {
                progress.chunk_skipped(len as u64);
                continue;
            }

            let data = source.read_range(offset, len).await.map_err(|e| {
                UploadError::from(e)
                    .with_session(session.session_id.clone())
                    .with_chunk(number)
            })?;
            ensure_live(token)?;

            let chunk = Chunk { number, offset, data };
            let receipt = transmitter
                .upload_chunk(session, &chunk, &options.retry, token, progress)
                .await?;
            progress.chunk_done(len as u64);
            progress.listener().on_chunk_complete(&receipt);
        }
        Ok(())
    }

    async fn finalize(
        &self,
        negotiator: &SessionNegotiator,
        session: &UploadSession,
        digest: &Digest,
        file_size: u64,
        token: &CancellationToken,
    ) -> Result<UploadResult, UploadError> {
        let result = negotiator.complete(session, digest, file_size, token).await?;
        if result.session_id != session.session_id {
            warn!(
                session_id = %session.session_id,
                completed = %result.session_id,
                "completion reported a different session id"
            );
        }
        Ok(result)
    }
}

fn ensure_live(token: &CancellationToken) -> Result<(), UploadError> {
    if token.is_cancelled() {
        Err(UploadError::cancelled())
    } else {
        Ok(())
    }
}

fn preflight(size: u64, options: &UploadOptions) -> Result<(), UploadError> {
    if size == 0 {
        return Err(UploadError::validation("source is empty"));
    }
    if let Some(max) = options.max_file_size {
        if size > max {
            return Err(UploadError::new(
                ErrorKind::FileTooLarge,
                format!("source is {size} bytes, limit is {max}"),
            ));
        }
    }
    Ok(())
}

/// Rebuilds a session from the service's status and collects the chunks it
/// already holds.
async fn reopen(
    negotiator: &SessionNegotiator,
    session_id: &str,
    file_size: u64,
    token: &CancellationToken,
) -> Result<(UploadSession, BTreeSet<u32>), UploadError> {
    let status = negotiator.status(session_id, token).await?;
    let session = UploadSession {
        session_id: status.session_id,
        upload_endpoint: status.upload_endpoint,
        chunk_size: status.chunk_size,
        total_chunks: status.total_chunks,
        expires_at: status.expires_at,
    };

    if status.state.is_terminal() || session.is_expired_at(Utc::now()) {
        return Err(UploadError::new(
            ErrorKind::SessionExpired,
            format!("session can no longer accept chunks ({:?})", status.state),
        )
        .with_session(session_id));
    }
    let expected = expected_chunks(file_size, session.chunk_size);
    if session.chunk_size == 0 || expected != session.total_chunks as u64 {
        return Err(UploadError::validation(format!(
            "source of {file_size} bytes does not match session of {} chunks at {} bytes",
            session.total_chunks, session.chunk_size
        ))
        .with_session(session_id));
    }

    let received: BTreeSet<u32> = status
        .received_chunks
        .into_iter()
        .filter(|n| *n < session.total_chunks)
        .collect();
    info!(
        session_id,
        already = ?received,
        total_chunks = session.total_chunks,
        "resuming upload session"
    );
    Ok((session, received))
}
