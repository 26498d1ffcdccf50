//! Job definitions
//!
//! Jobs are a closed set of maintenance operations. The store only creates
//! payloads; the queue assigns ids, priorities and sequence numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EntryId;

/// Kind of background job, in descending priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Promote,
    Decay,
    Persist,
    Warm,
}

impl JobKind {
    /// Higher runs first
    pub fn priority(&self) -> u8 {
        match self {
            Self::Promote => 3,
            Self::Decay => 2,
            Self::Persist => 1,
            Self::Warm => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::Decay => "decay",
            Self::Persist => "persist",
            Self::Warm => "warm",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a job does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Promote one short-term entry if it is salient enough
    Promote { id: EntryId },
    /// One decay sweep over long-term memory
    Decay,
    /// Save a snapshot through the persistence adapter
    Persist,
    /// Index an un-indexed entry and record `hits` retrievals of it
    Warm { id: EntryId, hits: u32 },
}

/// Coalescing key: at most one pending job per key
pub type JobKey = (JobKind, Option<EntryId>);

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Promote { .. } => JobKind::Promote,
            Self::Decay => JobKind::Decay,
            Self::Persist => JobKind::Persist,
            Self::Warm { .. } => JobKind::Warm,
        }
    }

    /// Entry the job operates on, if any
    pub fn target(&self) -> Option<EntryId> {
        match self {
            Self::Promote { id } | Self::Warm { id, .. } => Some(*id),
            Self::Decay | Self::Persist => None,
        }
    }

    pub fn key(&self) -> JobKey {
        (self.kind(), self.target())
    }

    /// Fold a duplicate payload into this one. Warm hits accumulate.
    pub fn merge(&mut self, other: &JobPayload) {
        if let (Self::Warm { hits, .. }, Self::Warm { hits: more, .. }) = (self, other) {
            *hits = hits.saturating_add(*more);
        }
    }
}

/// Queue-assigned job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    /// Failed attempt, waiting for backoff before requeue
    Retrying,
    Done,
    /// Retries exhausted
    Failed,
    /// Dropped at shutdown or superseded by a pending duplicate
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// A scheduled unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
    /// Attempts started so far
    pub attempt: u32,
    /// Enqueue order, for FIFO within a priority
    pub(crate) seq: u64,
}

impl Job {
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}
