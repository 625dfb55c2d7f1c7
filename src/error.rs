use std::fmt;
use strum::Display;
use thiserror::Error;

/// Typed outcome for a relocation that should not proceed on this torrent.
///
/// A skip is not a failure: the caller moves on to the next candidate and
/// must not fall back to the plain relocation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A file under the cache data path is currently being streamed
    Streaming,
    /// No symlinks or legacy hardlinks reference the cache copy
    NoLinks,
    /// The bulk copy is missing or does not verify against the cache copy
    NoHddCopy,
    /// Import-script mode is not fully configured
    NoConfig,
}

/// Represents a single validation error in the configuration.
///
/// Contains the field name that failed validation and a description of the issue.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Unified error type for torrent-shuttle.
///
/// Every fallible operation in the crate returns this enum. The variants
/// group into the four kinds the scheduler cares about:
/// - validation (bad hash, bad body, bad config) — never retried
/// - transient (network, 5xx, timeouts) — retried by the surrounding mechanism
/// - skip (typed relocation outcomes) — the scheduler proceeds to the next candidate
/// - fatal (verification failure, safety violation, link rewrite failure)
#[derive(Error, Debug, Clone)]
pub enum ShuttleError {
    // === Validation ===
    /// Infohash with a shape other than 32/40/64 hex characters
    #[error("Invalid infohash: {0}")]
    InvalidHash(String),

    /// Invalid request or parameter
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration failed validation
    #[error("Validation error: {}", .0.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
    ValidationError(Vec<ValidationIssue>),

    /// Failed to parse a config file or JSON body
    #[error("Failed to parse: {0}")]
    ParseError(String),

    // === Transient external ===
    /// Connection timeout - remote service not responding
    #[error("Connection timeout - remote service not responding")]
    ConnectionTimeout,

    /// Read timeout - request took too long
    #[error("Read timeout - request took too long")]
    ReadTimeout,

    /// Remote service disconnected
    #[error("Remote service disconnected")]
    ServerDisconnected,

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Remote API returned an error status
    #[error("API returned error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// qBittorrent rejected the login credentials
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Failed to initialize HTTP client
    #[error("Failed to initialize HTTP client: {0}")]
    ClientInitializationError(String),

    /// Retry limit exceeded
    #[error("Retry limit exceeded")]
    RetryLimitExceeded,

    // === Operation skip ===
    /// Typed non-error outcome of a stream-aware relocation
    #[error("Relocation skipped: {0}")]
    Skip(SkipReason),

    // === Fatal operation ===
    /// Torrent not present in the client
    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    /// Copy verification failed after all attempts
    #[error("Copy verification failed: {src} -> {dst}")]
    VerificationFailed { src: String, dst: String },

    /// The resolved cache data path escapes the configured cache root
    #[error("Safety check failed: {path} is not inside {root}")]
    SafetyViolation { path: String, root: String },

    /// Rewriting a media-library link failed
    #[error("Link rewrite failed: {0}")]
    LinkRewriteFailed(String),

    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    IoError(String),

    /// Orchestrator is shutting down and refuses new work
    #[error("Service is shutting down")]
    ShuttingDown,

    /// Checkpoint file rejected on load
    #[error("Checkpoint rejected: {0}")]
    CheckpointRejected(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ShuttleError {
    /// Check if this error is transient and retryable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ShuttleError::ConnectionTimeout
                | ShuttleError::ReadTimeout
                | ShuttleError::ServerDisconnected
                | ShuttleError::NetworkError(_)
                | ShuttleError::RetryLimitExceeded
                | ShuttleError::ApiError {
                    status: 408 | 429 | 500 | 502 | 503 | 504,
                    ..
                }
        )
    }

    /// Check if this error is a typed skip outcome rather than a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, ShuttleError::Skip(_))
    }

    /// The skip reason, if this is a skip outcome.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            ShuttleError::Skip(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Check if this error should surface to an HTTP caller as 400.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ShuttleError::InvalidHash(_)
                | ShuttleError::InvalidArgument(_)
                | ShuttleError::ValidationError(_)
                | ShuttleError::ParseError(_)
        )
    }
}

// === Conversion Implementations ===

impl From<std::io::Error> for ShuttleError {
    fn from(err: std::io::Error) -> Self {
        ShuttleError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for ShuttleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            if err.to_string().contains("connect") {
                ShuttleError::ConnectionTimeout
            } else {
                ShuttleError::ReadTimeout
            }
        } else if err.is_connect() {
            ShuttleError::ServerDisconnected
        } else {
            ShuttleError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ShuttleError {
    fn from(err: serde_json::Error) -> Self {
        ShuttleError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for ShuttleError {
    fn from(err: toml::de::Error) -> Self {
        ShuttleError::ParseError(err.to_string())
    }
}

/// Result type alias for operations that can fail with ShuttleError.
pub type ShuttleResult<T> = Result<T, ShuttleError>;
