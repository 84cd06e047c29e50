//! Wire message schema for the queued invocation protocol.
//!
//! Two surfaces share these types:
//!
//! - The simple driver POSTs a [`SubmitEnvelope`] and parses a
//!   [`PredictResponse`].
//! - The streaming driver sends the same envelope over a persistent
//!   connection and then receives a sequence of [`EventMessage`]s,
//!   discriminated by the `msg` tag.
//!
//! The legacy dialect's `process_streaming` tag is accepted as an alias of
//! `process_generating`; both carry identical semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker substring the server places in `error` when rate limiting.
pub const RATE_LIMIT_MARKER: &str = "rate limit";

/// Submission envelope correlating one job with the queue.
///
/// `session_hash` is client-generated, unique per job, and used by the
/// broker to route every subsequent message for that job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitEnvelope {
    pub data: Vec<Value>,
    pub fn_index: u32,
    pub session_hash: String,
}

/// Response body of the simple request/response driver.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PredictResponse {
    pub data: Option<Vec<Value>>,
    pub error: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub is_generating: Option<bool>,
}

/// Result payload carried by generating/completed events.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputPayload {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// One message on the streaming connection.
///
/// Every variant may carry an `event_id`; the kind itself is tagged with
/// `msg` on the wire.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventMessage {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// The tagged union of queue event kinds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum EventKind {
    /// Queue position update; the job stays non-terminal.
    Estimation {
        #[serde(default)]
        rank: Option<u32>,
        #[serde(default)]
        queue_size: Option<u32>,
        #[serde(default)]
        rank_eta: Option<f64>,
    },
    /// The remote function began executing.
    ProcessStarts {
        #[serde(default)]
        eta: Option<f64>,
    },
    /// A partial result; more may follow. `process_streaming` is the
    /// legacy dialect's name for the same event.
    #[serde(alias = "process_streaming")]
    ProcessGenerating {
        output: OutputPayload,
        success: bool,
        #[serde(default)]
        time_limit: Option<f64>,
    },
    /// Final result; terminal for the job.
    ProcessCompleted {
        output: OutputPayload,
        success: bool,
        #[serde(default)]
        title: Option<String>,
    },
    /// Keep-alive; resets the idle timer, no state change.
    Heartbeat,
    /// Server is done sending; close the connection.
    CloseStream,
    /// Server-side log line, surfaced through tracing only.
    Log {
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Broker-level failure outside the normal lifecycle.
    UnexpectedError {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        session_not_found: bool,
        #[serde(default)]
        success: bool,
    },
    /// Legacy capacity signal; the submission was never admitted.
    QueueFull,
}
