//! Job handle: one invocation's lifecycle, observed and cancelled locally.
//!
//! A [`Job`] is created per submission and identified by
//! `(session_hash, fn_index)`. Its mutable fields live behind a single
//! mutex shared between the driver thread (sole writer) and any number of
//! caller threads; a condvar wakes blocking accessors on terminal
//! transitions.
//!
//! States move monotonically through the lattice
//! `Pending → Queued → Running → Streaming → {Completed, Cancelled, Errored}`
//! and terminal states absorb every later transition, so duplicated or
//! out-of-order terminal signals from the wire are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;

use crate::error::{ClientError, Result};

/// Lifecycle states of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Streaming,
    Completed,
    Cancelled,
    Errored,
}

impl JobState {
    /// Position in the monotone lattice.
    fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Queued => 1,
            JobState::Running => 2,
            JobState::Streaming => 3,
            JobState::Completed | JobState::Cancelled | JobState::Errored => 4,
        }
    }

    /// Whether this state absorbs all later transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Errored
        )
    }
}

/// Last known queue position for a streaming job.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueStatus {
    pub rank: Option<u32>,
    pub queue_size: Option<u32>,
    pub eta: Option<f64>,
}

/// Terminal outcome handed to done-callbacks and blocking accessors.
pub type JobOutcome = std::result::Result<Value, ClientError>;

type DoneCallback = Box<dyn FnOnce(&JobOutcome) + Send>;

struct JobInner {
    state: JobState,
    /// Ordered result tuples: streamed partials, then the final tuple.
    outputs: Vec<Value>,
    /// Post-processed final result, set on completion.
    result: Option<Value>,
    error: Option<ClientError>,
    queue: QueueStatus,
    callbacks: Vec<DoneCallback>,
    /// Set once a worker has picked the job up; pre-dispatch cancellation
    /// wins only while this is false.
    dispatched: bool,
}

/// Cancellable handle for one in-flight or completed invocation.
#[derive(Clone)]
pub struct Job {
    session_hash: String,
    fn_index: u32,
    inner: Arc<(Mutex<JobInner>, Condvar)>,
    /// Wakes the driver's select loop on cancellation.
    cancel_notify: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

impl Job {
    pub(crate) fn new(session_hash: String, fn_index: u32) -> Self {
        Self {
            session_hash,
            fn_index,
            inner: Arc::new((
                Mutex::new(JobInner {
                    state: JobState::Pending,
                    outputs: Vec::new(),
                    result: None,
                    error: None,
                    queue: QueueStatus::default(),
                    callbacks: Vec::new(),
                    dispatched: false,
                }),
                Condvar::new(),
            )),
            cancel_notify: Arc::new(Notify::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Client-generated correlation id, unique per job.
    pub fn session_hash(&self) -> &str {
        &self.session_hash
    }

    pub fn fn_index(&self) -> u32 {
        self.fn_index
    }

    pub fn state(&self) -> JobState {
        self.inner.0.lock().unwrap().state
    }

    /// Ordered result tuples seen so far (partials first).
    pub fn outputs(&self) -> Vec<Value> {
        self.inner.0.lock().unwrap().outputs.clone()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.inner.0.lock().unwrap().queue
    }

    /// Notifier the driver selects on for cooperative cancellation.
    pub(crate) fn cancel_notifier(&self) -> Arc<Notify> {
        self.cancel_notify.clone()
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Called by the worker before opening any connection.
    ///
    /// Returns false when the job was cancelled pre-dispatch, in which
    /// case the worker must not run the pipeline.
    pub(crate) fn mark_dispatched(&self) -> bool {
        let mut inner = self.inner.0.lock().unwrap();
        if inner.state.is_terminal() {
            return false;
        }
        inner.dispatched = true;
        true
    }

    /// Advance through the lattice; regressions and post-terminal
    /// transitions are refused.
    pub(crate) fn advance(&self, to: JobState) -> bool {
        debug_assert!(!to.is_terminal(), "terminal transitions use complete/fail");
        let mut inner = self.inner.0.lock().unwrap();
        if inner.state.is_terminal() || to.rank() < inner.state.rank() {
            return false;
        }
        inner.state = to;
        true
    }

    pub(crate) fn set_queue_status(&self, status: QueueStatus) {
        let mut inner = self.inner.0.lock().unwrap();
        if !inner.state.is_terminal() {
            inner.queue = status;
            if inner.state.rank() <= JobState::Queued.rank() {
                inner.state = JobState::Queued;
            }
        }
    }

    /// Append one streamed partial tuple and enter Streaming.
    pub(crate) fn push_partial(&self, output: Value) {
        let mut inner = self.inner.0.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        inner.outputs.push(output);
        inner.state = JobState::Streaming;
    }

    /// Record the final result tuple and complete the job.
    ///
    /// When the final tuple repeats the last streamed partial it is not
    /// appended again, so `outputs` ends with each distinct tuple once.
    pub(crate) fn complete(&self, final_output: Value, result: Value) {
        self.finish(|inner| {
            if inner.outputs.last() != Some(&final_output) {
                inner.outputs.push(final_output);
            }
            inner.result = Some(result);
            inner.state = JobState::Completed;
        });
    }

    /// Complete with a result only (simple driver path, no partials).
    pub(crate) fn complete_with(&self, result: Value) {
        self.finish(|inner| {
            inner.result = Some(result);
            inner.state = JobState::Completed;
        });
    }

    /// Mark the job errored with the given cause.
    pub(crate) fn fail(&self, error: ClientError) {
        self.finish(|inner| {
            inner.error = Some(error);
            inner.state = JobState::Errored;
        });
    }

    /// Terminate a job that was never admitted (queue full).
    ///
    /// The cause is preserved for `result`/`error_of`, but the job is not
    /// marked Errored: capacity rejection is a transient signal, not a
    /// failure of the job itself.
    pub(crate) fn reject(&self, error: ClientError) {
        self.finish(|inner| {
            inner.error = Some(error);
            inner.state = JobState::Cancelled;
        });
    }

    fn mark_cancelled(&self) {
        self.finish(|inner| {
            inner.state = JobState::Cancelled;
        });
    }

    /// Apply a terminal mutation once, then wake waiters and run callbacks.
    fn finish(&self, mutate: impl FnOnce(&mut JobInner)) {
        let (callbacks, outcome) = {
            let mut inner = self.inner.0.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            mutate(&mut inner);
            self.inner.1.notify_all();
            (std::mem::take(&mut inner.callbacks), outcome_of(&inner))
        };
        // Callbacks run outside the lock so they may inspect the job.
        for callback in callbacks {
            callback(&outcome);
        }
    }

    /// Request cancellation.
    ///
    /// Returns false if the job is already terminal. Before dispatch the
    /// cancel is exact: the worker will never open a connection. In flight
    /// it closes the local connection and marks the job Cancelled, without
    /// any guarantee the remote side stops.
    pub fn cancel(&self) -> bool {
        {
            let inner = self.inner.0.lock().unwrap();
            if inner.state.is_terminal() {
                return false;
            }
        }
        self.cancelled.store(true, Ordering::Release);
        // notify_one stores a permit, so a driver that has not yet parked in
        // notified() still observes the cancel on its first poll.
        self.cancel_notify.notify_one();
        self.mark_cancelled();
        true
    }

    /// Register a callback fired exactly once with the terminal outcome.
    ///
    /// If the job is already terminal the callback runs immediately on the
    /// calling thread.
    pub fn add_done_callback(&self, callback: impl FnOnce(&JobOutcome) + Send + 'static) {
        let outcome = {
            let mut inner = self.inner.0.lock().unwrap();
            if !inner.state.is_terminal() {
                inner.callbacks.push(Box::new(callback));
                return;
            }
            outcome_of(&inner)
        };
        callback(&outcome);
    }

    /// Block until the job is terminal and return its result.
    ///
    /// `timeout = None` waits indefinitely. An Errored job re-raises the
    /// captured error kind; a Cancelled job raises [`ClientError::Cancelled`].
    pub fn result(&self, timeout: Option<Duration>) -> Result<Value> {
        let inner = self.wait_terminal(timeout)?;
        match inner.state {
            JobState::Completed => Ok(inner.result.clone().unwrap_or(Value::Null)),
            JobState::Cancelled => Err(inner
                .error
                .as_ref()
                .map(ClientError::duplicate)
                .unwrap_or(ClientError::Cancelled)),
            JobState::Errored => Err(inner
                .error
                .as_ref()
                .map(ClientError::duplicate)
                .unwrap_or_else(|| ClientError::Transport("job errored without cause".into()))),
            _ => unreachable!("wait_terminal returned a non-terminal state"),
        }
    }

    /// Block until terminal and return the captured error, if any.
    pub fn error_of(&self, timeout: Option<Duration>) -> Result<Option<ClientError>> {
        let inner = self.wait_terminal(timeout)?;
        Ok(inner.error.as_ref().map(ClientError::duplicate))
    }

    fn wait_terminal(&self, timeout: Option<Duration>) -> Result<std::sync::MutexGuard<'_, JobInner>> {
        let (lock, condvar) = (&self.inner.0, &self.inner.1);
        let mut inner = lock.lock().unwrap();
        match timeout {
            None => {
                while !inner.state.is_terminal() {
                    inner = condvar.wait(inner).unwrap();
                }
            }
            Some(limit) => {
                let deadline = std::time::Instant::now() + limit;
                while !inner.state.is_terminal() {
                    let remaining = deadline
                        .checked_duration_since(std::time::Instant::now())
                        .ok_or(ClientError::Timeout)?;
                    let (guard, wait) = condvar.wait_timeout(inner, remaining).unwrap();
                    inner = guard;
                    if wait.timed_out() && !inner.state.is_terminal() {
                        return Err(ClientError::Timeout);
                    }
                }
            }
        }
        Ok(inner)
    }
}

fn outcome_of(inner: &JobInner) -> JobOutcome {
    match inner.state {
        JobState::Completed => Ok(inner.result.clone().unwrap_or(Value::Null)),
        JobState::Cancelled => Err(inner
            .error
            .as_ref()
            .map(ClientError::duplicate)
            .unwrap_or(ClientError::Cancelled)),
        _ => Err(inner
            .error
            .as_ref()
            .map(ClientError::duplicate)
            .unwrap_or_else(|| ClientError::Transport("job errored without cause".into()))),
    }
}
