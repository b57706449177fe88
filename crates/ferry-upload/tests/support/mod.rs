//! In-process upload service with scripted faults.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{post, put},
};
use chrono::{DateTime, Utc};
use ferry_types::{
    CHUNK_DIGEST_HEADER, ChunkAck, CompleteRequest, CompleteResponse, ErrorBody,
    HASH_MISMATCH_CODE, InitiateRequest, InitiateResponse, SessionState, StatusResponse,
    UploadProgress,
};
use ferry_upload::{
    ChunkReceipt, ErrorKind, RetryPolicy, StaticCredential, TransportClient, UploadError,
    UploadListener, UploadOrchestrator, integrity,
};

pub const TOKEN: &str = "test-token";

/// What a chunk request does instead of succeeding.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Answer with this status and an error body.
    Status(u16),
    /// Store the chunk, then answer with this status (lost acknowledgement).
    StoreThenFail(u16),
    /// Hold the request this long before handling it normally.
    Stall(Duration),
}

#[derive(Debug, Clone)]
pub struct Script {
    /// Fail `POST /uploads` with this status.
    pub initiate_status: Option<u16>,
    /// Largest chunk size the service will grant.
    pub max_chunk_size: Option<u64>,
    /// Faults consumed in order, one per request for that chunk.
    pub chunk_faults: HashMap<u32, VecDeque<Fault>>,
    /// Flip a byte of this chunk after accepting it.
    pub corrupt_chunk: Option<u32>,
    /// Added to every chunk request.
    pub latency: Duration,
    /// Session lifetime from creation.
    pub ttl: chrono::Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            initiate_status: None,
            max_chunk_size: None,
            chunk_faults: HashMap::new(),
            corrupt_chunk: None,
            latency: Duration::ZERO,
            ttl: chrono::Duration::hours(1),
        }
    }
}

impl Script {
    pub fn fail_chunk(mut self, n: u32, faults: impl IntoIterator<Item = Fault>) -> Self {
        self.chunk_faults.entry(n).or_default().extend(faults);
        self
    }
}

#[derive(Debug)]
pub struct RemoteSession {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub file_digest: String,
    pub chunks: BTreeMap<u32, Bytes>,
    pub state: SessionState,
    pub expires_at: DateTime<Utc>,
}

impl RemoteSession {
    fn endpoint(&self) -> String {
        format!("/uploads/{}", self.id)
    }

    pub fn assembled(&self) -> Vec<u8> {
        self.chunks.values().flat_map(|c| c.iter().copied()).collect()
    }
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub script: Script,
    pub sessions: HashMap<String, RemoteSession>,
    /// Chunk numbers in arrival order, including failed attempts.
    pub chunk_log: Vec<u32>,
    pub initiates: usize,
    pub completes: usize,
    pub cancels: Vec<String>,
}

type Shared = Arc<Mutex<ServerState>>;

pub struct MockServer {
    pub base_url: String,
    state: Shared,
}

impl MockServer {
    pub async fn start(script: Script) -> Self {
        let state: Shared = Arc::new(Mutex::new(ServerState {
            script,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/uploads", post(initiate))
            .route("/uploads/{id}", axum::routing::get(status).delete(cancel))
            .route("/uploads/{id}/chunks/{n}", put(chunk))
            .route("/uploads/{id}/complete", post(complete))
            .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn orchestrator(&self) -> UploadOrchestrator {
        let transport = TransportClient::new(&self.base_url, Arc::new(StaticCredential::new(TOKEN)))
            .unwrap();
        UploadOrchestrator::new(transport)
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut ServerState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn chunk_log(&self) -> Vec<u32> {
        self.with_state(|s| s.chunk_log.clone())
    }

    pub fn cancels(&self) -> Vec<String> {
        self.with_state(|s| s.cancels.clone())
    }

    pub fn assembled(&self, id: &str) -> Vec<u8> {
        self.with_state(|s| s.sessions[id].assembled())
    }

    pub fn only_session_id(&self) -> String {
        self.with_state(|s| {
            assert_eq!(s.sessions.len(), 1, "expected exactly one session");
            s.sessions.keys().next().cloned().unwrap()
        })
    }
}

// -- Handlers --

fn error(status: u16, code: &str, message: impl Into<String>) -> Response {
    let status = StatusCode::from_u16(status).unwrap();
    let body = ErrorBody {
        code: Some(code.to_string()),
        message: Some(message.into()),
    };
    (status, Json(body)).into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        == Some(TOKEN)
}

async fn initiate(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(req): Json<InitiateRequest>,
) -> Response {
    if !authorized(&headers) {
        return error(401, "unauthorized", "missing bearer token");
    }
    let mut s = state.lock().unwrap();
    s.initiates += 1;
    if let Some(status) = s.script.initiate_status {
        return error(status, "rejected", format!("initiate rejected with {status}"));
    }

    let chunk_size = s
        .script
        .max_chunk_size
        .map_or(req.chunk_size, |max| max.min(req.chunk_size));
    let session = RemoteSession {
        id: uuid::Uuid::new_v4().to_string(),
        file_name: req.file_name,
        file_size: req.file_size,
        chunk_size,
        total_chunks: req.file_size.div_ceil(chunk_size) as u32,
        file_digest: req.file_digest,
        chunks: BTreeMap::new(),
        state: SessionState::Open,
        expires_at: Utc::now() + s.script.ttl,
    };
    let resp = InitiateResponse {
        session_id: session.id.clone(),
        upload_endpoint: session.endpoint(),
        chunk_size,
        total_chunks: session.total_chunks,
        expires_at: session.expires_at,
    };
    s.sessions.insert(session.id.clone(), session);
    (StatusCode::CREATED, Json(resp)).into_response()
}

async fn chunk(
    State(state): State<Shared>,
    Path((id, n)): Path<(String, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (latency, fault) = {
        let mut s = state.lock().unwrap();
        s.chunk_log.push(n);
        let fault = s.script.chunk_faults.get_mut(&n).and_then(VecDeque::pop_front);
        (s.script.latency, fault)
    };
    tokio::time::sleep(latency).await;

    let fail_after_store = match fault {
        Some(Fault::Status(status)) => {
            return error(status, "injected", format!("injected failure for chunk {n}"));
        }
        Some(Fault::Stall(d)) => {
            tokio::time::sleep(d).await;
            None
        }
        Some(Fault::StoreThenFail(status)) => Some(status),
        None => None,
    };

    if !authorized(&headers) {
        return error(401, "unauthorized", "missing bearer token");
    }
    let claimed = headers
        .get(CHUNK_DIGEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if claimed != integrity::hash(&body).to_hex() {
        return error(400, HASH_MISMATCH_CODE, format!("chunk {n} digest mismatch"));
    }

    let mut s = state.lock().unwrap();
    let corrupt = s.script.corrupt_chunk == Some(n);
    let Some(session) = s.sessions.get_mut(&id) else {
        return error(404, "not_found", "no such session");
    };
    if session.state != SessionState::Open || Utc::now() >= session.expires_at {
        return error(410, "gone", "session is closed");
    }
    if n >= session.total_chunks {
        return error(400, "bad_chunk", format!("chunk {n} out of range"));
    }

    let already_uploaded = session.chunks.contains_key(&n);
    if !already_uploaded {
        let mut data = body.to_vec();
        if corrupt && !data.is_empty() {
            data[0] ^= 0xff;
        }
        session.chunks.insert(n, Bytes::from(data));
    }

    if let Some(status) = fail_after_store {
        return error(status, "injected", "acknowledgement lost");
    }
    Json(ChunkAck {
        chunk_number: n,
        already_uploaded,
    })
    .into_response()
}

async fn complete(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(req): Json<CompleteRequest>,
) -> Response {
    let mut s = state.lock().unwrap();
    s.completes += 1;
    let Some(session) = s.sessions.get_mut(&id) else {
        return error(404, "not_found", "no such session");
    };
    if session.chunks.len() as u32 != session.total_chunks {
        return error(400, "incomplete", "missing chunks");
    }

    let actual = integrity::hash(&session.assembled()).to_hex();
    if actual != req.file_digest || actual != session.file_digest {
        return error(400, HASH_MISMATCH_CODE, "whole-file digest mismatch");
    }

    session.state = SessionState::Completed;
    Json(CompleteResponse {
        session_id: session.id.clone(),
        file_url: format!("https://cdn.test/{}/{}", session.id, session.file_name),
        file_size: session.file_size,
        completed_at: Utc::now(),
    })
    .into_response()
}

async fn cancel(State(state): State<Shared>, Path(id): Path<String>) -> StatusCode {
    let mut s = state.lock().unwrap();
    s.cancels.push(id.clone());
    match s.sessions.get_mut(&id) {
        Some(session) => {
            session.state = SessionState::Cancelled;
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn status(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let s = state.lock().unwrap();
    let Some(session) = s.sessions.get(&id) else {
        return error(404, "not_found", "no such session");
    };
    Json(StatusResponse {
        session_id: session.id.clone(),
        upload_endpoint: session.endpoint(),
        chunk_size: session.chunk_size,
        state: session.state,
        received_chunks: session.chunks.keys().copied().collect(),
        total_chunks: session.total_chunks,
        expires_at: session.expires_at,
    })
    .into_response()
}

// -- Client helpers --

/// Deterministic, non-repeating-per-chunk content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Retry policy with short delays so tests stay fast.
pub fn quick_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        ..RetryPolicy::default()
    }
}

/// Listener that records everything it is told.
#[derive(Default)]
pub struct Recorder {
    pub progress: Mutex<Vec<UploadProgress>>,
    pub chunks: Mutex<Vec<ChunkReceipt>>,
    pub retries: Mutex<Vec<(u32, ErrorKind, Option<u32>)>>,
    pub network_errors: Mutex<Vec<ErrorKind>>,
}

impl Recorder {
    pub fn last_progress(&self) -> UploadProgress {
        self.progress.lock().unwrap().last().cloned().unwrap()
    }

    pub fn retry_count(&self) -> usize {
        self.retries.lock().unwrap().len()
    }
}

impl UploadListener for Recorder {
    fn on_progress(&self, p: &UploadProgress) {
        self.progress.lock().unwrap().push(p.clone());
    }

    fn on_chunk_complete(&self, r: &ChunkReceipt) {
        self.chunks.lock().unwrap().push(r.clone());
    }

    fn on_retry(&self, attempt: u32, error: &UploadError, chunk: Option<u32>) {
        self.retries.lock().unwrap().push((attempt, error.kind, chunk));
    }

    fn on_network_error(&self, error: &UploadError) {
        self.network_errors.lock().unwrap().push(error.kind);
    }
}
