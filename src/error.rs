//! Error types for jobwire-client.

use thiserror::Error;

/// Main error type for all jobwire operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The served application's configuration could not be fetched or parsed.
    #[error("config fetch failed: {0}")]
    ConfigFetch(String),

    /// No dependency matches the requested api name or function index.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// An explicit serializer name did not resolve to a known codec.
    #[error("unknown serializer: {0}")]
    UnknownSerializer(String),

    /// A component type tag did not resolve to a known codec.
    #[error("unknown component type: {0}")]
    UnknownComponent(String),

    /// Caller supplied the wrong number of arguments for the endpoint.
    #[error("argument count mismatch: expected {expected}, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    /// The server rejected the request with a rate-limit marker.
    #[error("rate limited by remote: {0}")]
    RateLimited(String),

    /// The remote function raised an application-level error.
    #[error("remote error: {0}")]
    Remote(String),

    /// The queue no longer recognizes this job's session hash.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// The queue is at capacity; the submission was never admitted.
    #[error("queue full")]
    QueueFull,

    /// Response carried neither result data nor an error field.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Connection dropped or timed out before a terminal message arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// Blocking accessor timed out before the job reached a terminal state.
    #[error("timed out waiting for job")]
    Timeout,

    /// The job was cancelled before producing a result.
    #[error("job cancelled")]
    Cancelled,

    /// I/O error during file materialization or download.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP layer error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket layer error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ClientError {
    /// Clone-ish conversion for storing one error on the job while
    /// re-raising an equivalent from blocking accessors.
    pub(crate) fn duplicate(&self) -> ClientError {
        match self {
            ClientError::ConfigFetch(m) => ClientError::ConfigFetch(m.clone()),
            ClientError::UnknownEndpoint(m) => ClientError::UnknownEndpoint(m.clone()),
            ClientError::UnknownSerializer(m) => ClientError::UnknownSerializer(m.clone()),
            ClientError::UnknownComponent(m) => ClientError::UnknownComponent(m.clone()),
            ClientError::ArgumentCount { expected, got } => ClientError::ArgumentCount {
                expected: *expected,
                got: *got,
            },
            ClientError::RateLimited(m) => ClientError::RateLimited(m.clone()),
            ClientError::Remote(m) => ClientError::Remote(m.clone()),
            ClientError::SessionExpired(m) => ClientError::SessionExpired(m.clone()),
            ClientError::QueueFull => ClientError::QueueFull,
            ClientError::MalformedResponse(m) => ClientError::MalformedResponse(m.clone()),
            ClientError::Transport(m) => ClientError::Transport(m.clone()),
            ClientError::Timeout => ClientError::Timeout,
            ClientError::Cancelled => ClientError::Cancelled,
            other => ClientError::Transport(other.to_string()),
        }
    }
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
