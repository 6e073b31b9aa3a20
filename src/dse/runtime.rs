//! Worker-pool runtime for concurrent explorations.
//!
//! Each submitted job owns its model, adapter, and strategy, so independent
//! explorations of the same store can run on separate threads: committed
//! versions are immutable and shared by reference. The pool is bounded;
//! submission fails fast when the queue is full. Timeouts are implemented by
//! cancelling the job's token, never by killing a worker.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::{ExplorationError, MorphError, MorphResult};

use super::adapter::DesignSpaceAdapter;
use super::strategy::Strategy;
use super::ExplorationReport;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued explorations.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
        }
    }
}

struct Job {
    adapter: Box<DesignSpaceAdapter>,
    strategy: Box<dyn Strategy + Send>,
    reply: Sender<MorphResult<ExplorationReport>>,
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let thread_name = format!("morphspace-explorer-{idx}");
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    while let Ok(mut job) = rx.recv() {
                        let result = job.adapter.explore(job.strategy.as_mut());
                        let _ = job.reply.send(result);
                    }
                    debug!(worker = idx, "explorer worker shutting down");
                })
                .expect("failed to spawn morphspace explorer worker");
            handles.push(handle);
        }

        Self {
            tx,
            workers: handles,
            queue_capacity,
        }
    }

    fn try_submit(&self, job: Job) -> MorphResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExplorationError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExplorationError::Disconnected.into()),
        }
    }

    fn shutdown(self) {
        // Close the channel: workers drain queued jobs then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Handle to one submitted exploration.
pub struct ExplorationHandle {
    rx: Receiver<MorphResult<ExplorationReport>>,
    cancel: CancellationToken,
}

impl ExplorationHandle {
    /// Returns the job's cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests cooperative cancellation of the job.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the exploration to complete.
    pub fn join(self) -> MorphResult<ExplorationReport> {
        self.rx
            .recv()
            .map_err(|_| MorphError::from(ExplorationError::Disconnected))?
    }

    /// Waits with a deadline. On timeout the job's token is cancelled so the
    /// worker winds down at its next check point, and `Timeout` is returned.
    pub fn join_timeout(self, timeout: Duration) -> MorphResult<ExplorationReport> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                self.cancel.cancel();
                Err(ExplorationError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into())
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(ExplorationError::Disconnected.into())
            }
        }
    }
}

/// Bounded worker pool hosting independent explorations.
pub struct ExplorationRuntime {
    pool: WorkerPool,
}

impl ExplorationRuntime {
    /// Starts the runtime.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            pool: WorkerPool::start(config.workers, config.queue_capacity),
        }
    }

    /// Submits an exploration; fails fast when the queue is full.
    pub fn submit(
        &self,
        adapter: DesignSpaceAdapter,
        strategy: impl Strategy + Send + 'static,
    ) -> MorphResult<ExplorationHandle> {
        let cancel = adapter.cancellation_token();
        let (tx, rx) = bounded::<MorphResult<ExplorationReport>>(1);
        self.pool.try_submit(Job {
            adapter: Box::new(adapter),
            strategy: Box::new(strategy),
            reply: tx,
        })?;
        Ok(ExplorationHandle { rx, cancel })
    }
}

impl Drop for ExplorationRuntime {
    fn drop(&mut self) {
        // Deterministic shutdown: stop accepting work and join the threads.
        let pool = std::mem::replace(
            &mut self.pool,
            WorkerPool {
                tx: bounded::<Job>(1).0,
                workers: Vec::new(),
                queue_capacity: 1,
            },
        );
        pool.shutdown();
    }
}
