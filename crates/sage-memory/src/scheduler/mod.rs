//! Background Task Scheduler
//!
//! Drains the [`JobQueue`] with a fixed pool of tokio worker tasks so that
//! promotion, decay, persistence and cache warming never run on the
//! foreground conversation path.
//!
//! # Lifecycle
//!
//! 1. `TaskScheduler::start` spawns the workers
//! 2. Producers enqueue payloads on the shared queue
//! 3. `shutdown` closes the queue, cancels queued jobs, lets running jobs
//!    finish and joins the workers
//!
//! Tests can skip the worker pool entirely with
//! [`TaskScheduler::run_until_idle`], which drains the queue on the calling
//! task and retries without backoff.

mod job;
mod queue;
mod retry;

pub use job::{Job, JobId, JobKey, JobKind, JobPayload, JobState};
pub use queue::{DurabilityWarning, EnqueueOutcome, JobQueue, QueueStats};
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::{MemoryError, MemoryResult};

/// Executes jobs taken from the queue
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> MemoryResult<()>;
}

/// Summary returned by [`TaskScheduler::shutdown`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Jobs cancelled because they had not started
    pub cancelled: usize,
    pub completed: u64,
    pub failed: u64,
    pub warnings: Vec<DurabilityWarning>,
}

/// Fixed-size worker pool over a shared [`JobQueue`]
pub struct TaskScheduler {
    queue: Arc<JobQueue>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskScheduler {
    /// Spawn `config.workers` worker tasks on the current runtime
    pub fn start(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>, config: &SchedulerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let policy = RetryPolicy::from_config(config);
        let persist_timeout = config.persist_timeout();
        let worker_count = config.workers.max(1);

        let workers = (0..worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    queue: queue.clone(),
                    handler: handler.clone(),
                    policy: policy.clone(),
                    persist_timeout,
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::info!(workers = worker_count, "task scheduler started");

        Self {
            queue,
            shutdown_tx,
            workers,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Wait until every queued, running and retrying job has settled
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Close the queue, cancel jobs that have not started and join workers
    pub async fn shutdown(self) -> ShutdownReport {
        let _ = self.shutdown_tx.send(true);
        let cancelled = self.queue.close();

        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "scheduler worker panicked");
            }
        }

        let stats = self.queue.stats();
        let report = ShutdownReport {
            cancelled,
            completed: stats.completed,
            failed: stats.failed,
            warnings: self.queue.warnings(),
        };
        tracing::info!(
            cancelled = report.cancelled,
            completed = report.completed,
            failed = report.failed,
            "task scheduler stopped"
        );
        report
    }

    /// Drain the queue on the calling task.
    ///
    /// Failed jobs are requeued immediately, without backoff, until they
    /// exhaust their attempts. Returns the number of attempts executed.
    pub async fn run_until_idle(queue: &JobQueue, handler: &dyn JobHandler, config: &SchedulerConfig) -> usize {
        let policy = RetryPolicy::from_config(config);
        let persist_timeout = config.persist_timeout();
        let mut executed = 0;

        while let Some(job) = queue.pop() {
            executed += 1;
            match execute(handler, &job, persist_timeout).await {
                Ok(()) => queue.mark_done(&job),
                Err(e) if policy.should_retry(job.attempt) => {
                    tracing::debug!(job = %job.id, kind = %job.kind(), attempt = job.attempt, error = %e, "job failed, retrying");
                    let id = job.id;
                    if queue.mark_retrying(job) {
                        queue.requeue(id);
                    }
                }
                Err(e) => queue.mark_failed(&job, &e.to_string()),
            }
        }

        executed
    }
}

/// Run one attempt; persistence attempts are bounded by `persist_timeout`
async fn execute(handler: &dyn JobHandler, job: &Job, persist_timeout: Duration) -> MemoryResult<()> {
    if job.kind() == JobKind::Persist {
        match tokio::time::timeout(persist_timeout, handler.handle(job)).await {
            Ok(result) => result,
            Err(_) => Err(MemoryError::timeout(persist_timeout.as_millis() as u64)),
        }
    } else {
        handler.handle(job).await
    }
}

struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    policy: RetryPolicy,
    persist_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        tracing::debug!(worker = self.id, "worker started");

        loop {
            if let Some(job) = self.queue.pop() {
                self.process(job).await;
                continue;
            }

            if self.queue.is_closed() || *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = self.queue.job_available() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, job: Job) {
        let started = std::time::Instant::now();
        match execute(self.handler.as_ref(), &job, self.persist_timeout).await {
            Ok(()) => {
                tracing::debug!(
                    worker = self.id,
                    job = %job.id,
                    kind = %job.kind(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job completed"
                );
                self.queue.mark_done(&job);
            }
            Err(e) if self.policy.should_retry(job.attempt) => {
                let delay = self.policy.next_delay(job.attempt);
                tracing::warn!(
                    worker = self.id,
                    job = %job.id,
                    kind = %job.kind(),
                    attempt = job.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "job failed, retrying after backoff"
                );
                let id = job.id;
                if self.queue.mark_retrying(job) {
                    let queue = self.queue.clone();
                    let mut shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => queue.requeue(id),
                            _ = shutdown.changed() => {}
                        }
                    });
                }
            }
            Err(e) => self.queue.mark_failed(&job, &e.to_string()),
        }
    }
}
