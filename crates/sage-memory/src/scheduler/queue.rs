//! Priority job queue.
//!
//! Jobs are dequeued from the highest priority first and FIFO within a
//! priority. At most one pending (queued or retrying) job exists per
//! [`JobKey`]; duplicates are folded into it.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::job::{Job, JobId, JobKey, JobKind, JobPayload, JobState};

/// Terminal job states kept for `status` lookups
const TERMINAL_HISTORY: usize = 1024;

/// Result of an enqueue request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New job created
    Queued(JobId),
    /// Folded into an already pending job
    Coalesced(JobId),
    /// Queue is closed
    Rejected,
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Queued(id) | Self::Coalesced(id) => Some(*id),
            Self::Rejected => None,
        }
    }
}

/// A persistence job exhausted its retries; in-memory state is ahead of the
/// last successful flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurabilityWarning {
    pub job_id: JobId,
    pub attempts: u32,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for DurabilityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "snapshot not saved after {} attempts ({}): {}",
            self.attempts, self.job_id, self.message
        )
    }
}

/// Queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    pub enqueued: u64,
    pub coalesced: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub cancelled: u64,
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    priority: u8,
    seq: u64,
    id: JobId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<HeapEntry>,
    /// Queued and retrying jobs
    pending: HashMap<JobId, Job>,
    pending_keys: HashMap<JobKey, JobId>,
    states: HashMap<JobId, JobState>,
    terminal: VecDeque<JobId>,
    next_id: u64,
    next_seq: u64,
    in_flight: usize,
    retrying: usize,
    closed: bool,
    warnings: Vec<DurabilityWarning>,
    stats: QueueStats,
}

impl QueueInner {
    fn set_terminal(&mut self, id: JobId, state: JobState) {
        self.states.insert(id, state);
        self.terminal.push_back(id);
        while self.terminal.len() > TERMINAL_HISTORY {
            if let Some(old) = self.terminal.pop_front() {
                self.states.remove(&old);
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

/// Shared job queue between the store (producer) and the scheduler (consumer)
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    /// Signals workers that a job became available
    available: Notify,
    /// Signals waiters that the queue drained
    idle: Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            available: Notify::new(),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Submit a job, coalescing with a pending job of the same key
    pub fn enqueue(&self, payload: JobPayload) -> EnqueueOutcome {
        let mut inner = self.lock();

        if inner.closed {
            inner.stats.rejected += 1;
            tracing::debug!(kind = %payload.kind(), "queue closed, job rejected");
            return EnqueueOutcome::Rejected;
        }

        let key = payload.key();
        if let Some(existing) = inner.pending_keys.get(&key).copied() {
            if let Some(job) = inner.pending.get_mut(&existing) {
                job.payload.merge(&payload);
                inner.stats.coalesced += 1;
                return EnqueueOutcome::Coalesced(existing);
            }
        }

        inner.next_id += 1;
        inner.next_seq += 1;
        let id = JobId(inner.next_id);
        let kind = payload.kind();
        let job = Job {
            id,
            payload,
            priority: kind.priority(),
            enqueued_at: Utc::now(),
            attempt: 0,
            seq: inner.next_seq,
        };

        inner.heap.push(HeapEntry {
            priority: job.priority,
            seq: job.seq,
            id,
        });
        inner.pending.insert(id, job);
        inner.pending_keys.insert(key, id);
        inner.states.insert(id, JobState::Queued);
        inner.stats.enqueued += 1;
        drop(inner);

        tracing::trace!(job = %id, %kind, "job queued");
        self.available.notify_one();
        EnqueueOutcome::Queued(id)
    }

    /// Current state of a job; `None` once its terminal record is evicted
    pub fn status(&self, id: JobId) -> Option<JobState> {
        self.lock().states.get(&id).copied()
    }

    /// Jobs waiting to run (excluding retrying jobs)
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.pending.len() - inner.retrying
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// No queued, running or retrying jobs
    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.queued = inner.pending.len() - inner.retrying;
        stats.running = inner.in_flight;
        stats.retrying = inner.retrying;
        stats
    }

    /// Durability warnings raised by persistence jobs that exhausted retries
    pub fn warnings(&self) -> Vec<DurabilityWarning> {
        self.lock().warnings.clone()
    }

    /// Queued jobs by kind, highest priority first
    pub fn pending_kinds(&self) -> Vec<JobKind> {
        let inner = self.lock();
        let mut jobs: Vec<&Job> = inner
            .pending
            .values()
            .filter(|job| inner.states.get(&job.id) == Some(&JobState::Queued))
            .collect();
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.seq.cmp(&b.seq)));
        jobs.into_iter().map(Job::kind).collect()
    }

    /// Stop accepting work and cancel queued and retrying jobs.
    ///
    /// Returns the number of cancelled jobs. Running jobs are unaffected.
    pub fn close(&self) -> usize {
        let mut inner = self.lock();
        if inner.closed {
            return 0;
        }
        inner.closed = true;

        let cancelled: Vec<JobId> = inner.pending.keys().copied().collect();
        for id in &cancelled {
            inner.set_terminal(*id, JobState::Cancelled);
        }
        inner.pending.clear();
        inner.pending_keys.clear();
        inner.heap.clear();
        inner.retrying = 0;
        inner.stats.cancelled += cancelled.len() as u64;
        let idle = inner.is_idle();
        drop(inner);

        if !cancelled.is_empty() {
            tracing::info!(cancelled = cancelled.len(), "cancelled pending jobs at shutdown");
        }
        self.available.notify_waiters();
        if idle {
            self.idle.notify_waiters();
        }
        cancelled.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait until the queue has no queued, running or retrying jobs
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) async fn job_available(&self) {
        self.available.notified().await;
    }

    /// Take the highest-priority queued job and mark it running
    pub(crate) fn pop(&self) -> Option<Job> {
        let mut inner = self.lock();
        while let Some(entry) = inner.heap.pop() {
            let Some(mut job) = inner.pending.remove(&entry.id) else {
                continue;
            };
            let key = job.payload.key();
            if inner.pending_keys.get(&key) == Some(&job.id) {
                inner.pending_keys.remove(&key);
            }
            job.attempt += 1;
            inner.states.insert(job.id, JobState::Running);
            inner.in_flight += 1;
            return Some(job);
        }
        None
    }

    pub(crate) fn mark_done(&self, job: &Job) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.set_terminal(job.id, JobState::Done);
        inner.stats.completed += 1;
        self.notify_if_idle(inner);
    }

    /// Record a job whose retries are exhausted
    pub(crate) fn mark_failed(&self, job: &Job, message: &str) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.set_terminal(job.id, JobState::Failed);
        inner.stats.failed += 1;

        if job.kind() == JobKind::Persist {
            let warning = DurabilityWarning {
                job_id: job.id,
                attempts: job.attempt,
                message: message.to_string(),
                at: Utc::now(),
            };
            tracing::warn!(job = %job.id, attempts = job.attempt, error = %message, "durability warning: {}", warning);
            inner.warnings.push(warning);
        } else {
            tracing::error!(job = %job.id, kind = %job.kind(), attempts = job.attempt, error = %message, "job dropped after exhausting retries");
        }
        self.notify_if_idle(inner);
    }

    /// Park a failed job until its backoff elapses.
    ///
    /// Returns false when the job was folded into a newer pending duplicate
    /// or the queue is closed; the caller must not requeue it then.
    pub(crate) fn mark_retrying(&self, job: Job) -> bool {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);

        if inner.closed {
            inner.set_terminal(job.id, JobState::Cancelled);
            inner.stats.cancelled += 1;
            self.notify_if_idle(inner);
            return false;
        }

        let key = job.payload.key();
        if let Some(existing) = inner.pending_keys.get(&key).copied() {
            if let Some(pending) = inner.pending.get_mut(&existing) {
                pending.payload.merge(&job.payload);
                inner.set_terminal(job.id, JobState::Cancelled);
                inner.stats.coalesced += 1;
                self.notify_if_idle(inner);
                return false;
            }
        }

        inner.states.insert(job.id, JobState::Retrying);
        inner.pending_keys.insert(key, job.id);
        inner.pending.insert(job.id, job);
        inner.retrying += 1;
        inner.stats.retried += 1;
        true
    }

    /// Return a retrying job to the queue after its backoff
    pub(crate) fn requeue(&self, id: JobId) {
        let mut inner = self.lock();
        if inner.states.get(&id) != Some(&JobState::Retrying) {
            return;
        }
        let Some((priority, seq)) = inner.pending.get(&id).map(|job| (job.priority, job.seq)) else {
            return;
        };
        inner.retrying = inner.retrying.saturating_sub(1);
        inner.states.insert(id, JobState::Queued);
        inner.heap.push(HeapEntry { priority, seq, id });
        drop(inner);
        self.available.notify_one();
    }

    fn notify_if_idle(&self, inner: MutexGuard<'_, QueueInner>) {
        let idle = inner.is_idle();
        drop(inner);
        if idle {
            self.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryId;

    #[test]
    fn test_priority_then_fifo() {
        let queue = JobQueue::new();
        let a = EntryId::new();
        let b = EntryId::new();

        queue.enqueue(JobPayload::Warm { id: a, hits: 1 });
        queue.enqueue(JobPayload::Persist);
        queue.enqueue(JobPayload::Promote { id: a });
        queue.enqueue(JobPayload::Decay);
        queue.enqueue(JobPayload::Promote { id: b });

        let order: Vec<JobPayload> = std::iter::from_fn(|| queue.pop()).map(|j| j.payload).collect();
        assert_eq!(
            order,
            vec![
                JobPayload::Promote { id: a },
                JobPayload::Promote { id: b },
                JobPayload::Decay,
                JobPayload::Persist,
                JobPayload::Warm { id: a, hits: 1 },
            ]
        );
    }

    #[test]
    fn test_duplicates_coalesce() {
        let queue = JobQueue::new();
        let id = EntryId::new();

        let first = queue.enqueue(JobPayload::Warm { id, hits: 1 });
        let second = queue.enqueue(JobPayload::Warm { id, hits: 2 });
        assert!(matches!(first, EnqueueOutcome::Queued(_)));
        assert_eq!(second, EnqueueOutcome::Coalesced(first.job_id().unwrap()));
        assert!(matches!(queue.enqueue(JobPayload::Decay), EnqueueOutcome::Queued(_)));
        assert!(matches!(queue.enqueue(JobPayload::Decay), EnqueueOutcome::Coalesced(_)));
        assert_eq!(queue.len(), 2);

        let warm = std::iter::from_fn(|| queue.pop())
            .find(|j| j.kind() == JobKind::Warm)
            .unwrap();
        assert_eq!(warm.payload, JobPayload::Warm { id, hits: 3 });
    }

    #[test]
    fn test_running_job_does_not_absorb_new_work() {
        let queue = JobQueue::new();
        let id = EntryId::new();
        queue.enqueue(JobPayload::Promote { id });
        let running = queue.pop().unwrap();

        assert!(matches!(queue.enqueue(JobPayload::Promote { id }), EnqueueOutcome::Queued(_)));
        queue.mark_done(&running);
        assert_eq!(queue.status(running.id), Some(JobState::Done));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_retry_lifecycle() {
        let queue = JobQueue::new();
        let id = queue.enqueue(JobPayload::Decay).job_id().unwrap();

        let job = queue.pop().unwrap();
        assert_eq!(job.attempt, 1);
        assert_eq!(queue.status(id), Some(JobState::Running));

        assert!(queue.mark_retrying(job));
        assert_eq!(queue.status(id), Some(JobState::Retrying));
        assert!(queue.pop().is_none());
        assert!(!queue.is_idle());

        // A duplicate folds into the retrying job.
        assert_eq!(queue.enqueue(JobPayload::Decay), EnqueueOutcome::Coalesced(id));

        queue.requeue(id);
        let job = queue.pop().unwrap();
        assert_eq!(job.attempt, 2);
        queue.mark_failed(&job, "boom");
        assert_eq!(queue.status(id), Some(JobState::Failed));
        assert!(queue.is_idle());
        assert!(queue.warnings().is_empty());
    }

    #[test]
    fn test_failed_persist_raises_warning() {
        let queue = JobQueue::new();
        queue.enqueue(JobPayload::Persist);
        let job = queue.pop().unwrap();
        queue.mark_failed(&job, "disk full");

        let warnings = queue.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].job_id, job.id);
        assert!(warnings[0].to_string().contains("disk full"));
    }

    #[test]
    fn test_close_cancels_and_rejects() {
        let queue = JobQueue::new();
        let queued = queue.enqueue(JobPayload::Decay).job_id().unwrap();
        queue.enqueue(JobPayload::Persist);
        let running = queue.pop().unwrap();
        assert_eq!(running.id, queued);

        assert_eq!(queue.close(), 1);
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(JobPayload::Decay), EnqueueOutcome::Rejected);
        assert!(queue.pop().is_none());

        queue.mark_done(&running);
        let stats = queue.stats();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.completed, 1);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_pending_kinds_in_priority_order() {
        let queue = JobQueue::new();
        queue.enqueue(JobPayload::Persist);
        queue.enqueue(JobPayload::Promote { id: EntryId::new() });
        assert_eq!(queue.pending_kinds(), vec![JobKind::Promote, JobKind::Persist]);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_when_drained() {
        let queue = std::sync::Arc::new(JobQueue::new());
        queue.enqueue(JobPayload::Decay);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_idle().await })
        };

        let job = queue.pop().unwrap();
        queue.mark_done(&job);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
