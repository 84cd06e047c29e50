//! Streaming driver: persistent connection speaking the queue event
//! protocol.
//!
//! The driver opens one WebSocket per job, sends the submission envelope,
//! then loops over incoming [`EventMessage`]s. The state machine itself
//! lives in [`apply_event`], a synchronous step over the job handle, so
//! the full event lattice is unit-testable without sockets; the async loop
//! only adds I/O, idle timing, and cooperative cancellation.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ClientError, Result};
use crate::job::{Job, JobState, QueueStatus};
use crate::protocol::{EventKind, EventMessage, SubmitEnvelope};
use crate::serializer::OutputPipeline;

/// Default bound on connection open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on socket silence; heartbeats reset it.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Fixed queue-join path on the streaming endpoint.
const QUEUE_PATH: &str = "/queue/join";

/// What the driver loop must do after one event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventAction {
    /// Keep reading.
    Continue,
    /// Keep reading and reset the idle timer.
    Heartbeat,
    /// Post-process and append a partial output tuple.
    Partial(Vec<Value>),
    /// Post-process the final tuple and complete the job.
    Final(Vec<Value>),
    /// Close the connection; a job still non-terminal at this point is
    /// treated as a stranded stream by the driver loop.
    Stop,
}

/// Advance the job's state machine by one event.
///
/// Once the job is terminal every message is absorbed without effect;
/// duplicated `process_completed` and late `close_stream` are no-ops.
pub fn apply_event(job: &Job, message: EventMessage) -> EventAction {
    if job.state().is_terminal() {
        return EventAction::Stop;
    }

    match message.kind {
        EventKind::Estimation {
            rank,
            queue_size,
            rank_eta,
        } => {
            job.set_queue_status(QueueStatus {
                rank,
                queue_size,
                eta: rank_eta,
            });
            EventAction::Continue
        }
        EventKind::ProcessStarts { .. } => {
            job.advance(JobState::Running);
            EventAction::Continue
        }
        EventKind::ProcessGenerating {
            output, success, ..
        } => {
            if !success {
                job.fail(ClientError::Remote(
                    output.error.unwrap_or_else(|| "generation failed".into()),
                ));
                return EventAction::Stop;
            }
            EventAction::Partial(output.data)
        }
        EventKind::ProcessCompleted {
            output, success, ..
        } => {
            if !success {
                job.fail(ClientError::Remote(
                    output.error.unwrap_or_else(|| "process failed".into()),
                ));
                return EventAction::Stop;
            }
            EventAction::Final(output.data)
        }
        EventKind::Heartbeat => EventAction::Heartbeat,
        EventKind::CloseStream => EventAction::Stop,
        EventKind::Log { level, message } => {
            tracing::debug!(
                level = level.as_deref().unwrap_or("info"),
                message = message.as_deref().unwrap_or(""),
                "server log"
            );
            EventAction::Continue
        }
        EventKind::UnexpectedError {
            message,
            session_not_found,
            ..
        } => {
            let text = message.unwrap_or_else(|| "unexpected error".into());
            if session_not_found {
                job.fail(ClientError::SessionExpired(text));
            } else {
                job.fail(ClientError::Remote(text));
            }
            EventAction::Stop
        }
        EventKind::QueueFull => {
            job.reject(ClientError::QueueFull);
            EventAction::Stop
        }
    }
}

/// Turn the app's root HTTP URL into the streaming endpoint URL.
pub fn build_ws_url(root_url: &str) -> String {
    let root = root_url.trim_end_matches('/');
    let ws_root = if let Some(rest) = root.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = root.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        root.to_string()
    };
    format!("{ws_root}{QUEUE_PATH}")
}

/// Persistent-connection driver for one job.
pub struct StreamingDriver {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for StreamingDriver {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl StreamingDriver {
    /// Connect, submit, then drive the event loop to a terminal state.
    ///
    /// The job owns this connection exclusively. Errors returned here mean
    /// the stream ended without a terminal message; terminal outcomes are
    /// recorded on the job before returning `Ok`.
    pub async fn run(
        &self,
        job: &Job,
        ws_url: &str,
        envelope: &SubmitEnvelope,
        pipeline: &OutputPipeline<'_>,
    ) -> Result<()> {
        let cancel = job.cancel_notifier();

        let (mut ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(ws_url))
            .await
            .map_err(|_| {
                ClientError::Transport(format!("connection to {ws_url} timed out"))
            })??;
        tracing::debug!(%ws_url, session = job.session_hash(), "streaming connection open");

        ws.send(Message::Text(serde_json::to_string(envelope)?))
            .await?;

        let mut deadline = tokio::time::Instant::now() + self.idle_timeout;
        loop {
            tokio::select! {
                _ = cancel.notified() => {
                    tracing::debug!(session = job.session_hash(), "cancelled, closing stream");
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = ws.close(None).await;
                    return Err(ClientError::Transport("idle timeout on streaming connection".into()));
                }
                incoming = ws.next() => {
                    let frame = match incoming {
                        None => {
                            if job.state().is_terminal() {
                                return Ok(());
                            }
                            return Err(ClientError::Transport(
                                "connection closed without terminal message".into(),
                            ));
                        }
                        Some(frame) => frame?,
                    };
                    deadline = tokio::time::Instant::now() + self.idle_timeout;

                    let text = match frame {
                        Message::Text(text) => text,
                        Message::Close(_) => {
                            if job.state().is_terminal() {
                                return Ok(());
                            }
                            return Err(ClientError::Transport(
                                "connection closed without terminal message".into(),
                            ));
                        }
                        // Pings are answered by the socket layer.
                        _ => continue,
                    };

                    let message: EventMessage = match serde_json::from_str(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::warn!(error = %e, "ignoring unparseable event");
                            continue;
                        }
                    };

                    match apply_event(job, message) {
                        EventAction::Continue | EventAction::Heartbeat => {}
                        EventAction::Partial(data) => {
                            let value = pipeline.process(data).await?;
                            job.push_partial(value);
                        }
                        EventAction::Final(data) => {
                            let value = pipeline.process(data).await?;
                            job.complete(value.clone(), value);
                            let _ = ws.close(None).await;
                            return Ok(());
                        }
                        EventAction::Stop => {
                            let _ = ws.close(None).await;
                            if job.state().is_terminal() {
                                return Ok(());
                            }
                            // A close_stream before any terminal message is
                            // the same stranded stream as a raw socket close.
                            return Err(ClientError::Transport(
                                "stream closed without terminal message".into(),
                            ));
                        }
                    }
                }
            }
        }
    }
}
