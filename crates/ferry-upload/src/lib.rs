/// Ferry Upload: resumable chunked uploads over unreliable networks.
///
/// Provides:
/// - Session negotiation with a server-chosen chunk size
/// - Strictly ordered chunk transmission with per-chunk SHA-256 digests
/// - Bounded retries with exponential backoff and ±25% jitter
/// - Composable cancellation with per-call timeouts
/// - Whole-file digest verification at completion
/// - Resume of interrupted sessions from the service's status

pub mod backoff;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod credentials;
pub mod error;
pub mod integrity;
pub mod listener;
pub mod orchestrator;
pub mod progress;
pub mod session;
pub mod source;
pub mod transport;

// Re-export key types for convenience.
pub use backoff::{RetryPolicy, next_delay};
pub use cancel::{CancelReason, CancellationToken};
pub use chunk::{Chunk, ChunkTransmitter};
pub use config::{DEFAULT_CHUNK_SIZE, UploadOptions};
pub use credentials::{CredentialProvider, FnCredential, StaticCredential};
pub use error::{ErrorKind, UploadError};
pub use integrity::Digest;
pub use listener::{Callbacks, ChunkReceipt, NullListener, TracingListener, UploadListener};
pub use orchestrator::UploadOrchestrator;
pub use progress::ProgressReporter;
pub use session::{InitiateParams, SessionNegotiator, UploadSession};
pub use source::{ByteSource, FileSource, MemorySource};
pub use transport::{TransportClient, TransportRequest, TransportResponse};

pub use ferry_types::{UploadProgress, UploadResult, UploadStatus};
