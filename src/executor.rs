//! Bounded worker pool driving invocation pipelines.
//!
//! A fixed number of OS threads share one admission queue; that queue is
//! the only cross-thread write-shared structure in the crate. Each task
//! builds a dedicated current-thread tokio runtime and drives exactly one
//! job's transport connection, so no connection or runtime is ever shared
//! across jobs. Completion crosses back to callers through the job's own
//! synchronized state, never through globals.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Default number of concurrently in-flight jobs per client.
pub const DEFAULT_MAX_WORKERS: usize = 4;

type PoolTask = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of pipeline workers.
pub struct WorkerPool {
    tx: Option<mpsc::Sender<PoolTask>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` worker threads (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<PoolTask>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|index| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("jobwire-worker-{index}"))
                    .spawn(move || loop {
                        // Hold the lock only while receiving; admission
                        // order is the pool's only cross-job guarantee.
                        let task = match rx.lock().unwrap().recv() {
                            Ok(task) => task,
                            Err(_) => break,
                        };
                        task();
                    })
                    .expect("worker thread spawn failed")
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Enqueue one task; it runs when a worker frees up.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            // Receiver outlives the sender unless the pool is dropping.
            let _ = tx.send(Box::new(task));
        }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Close the queue, then let workers drain what was admitted.
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Build the per-job single-thread runtime.
pub(crate) fn job_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}
