//! Memory System
//!
//! [`SageMemory`] wires the store, index, assembler, scheduler and
//! persistence adapter into one explicitly constructed instance.
//!
//! # Lifecycle
//!
//! 1. `open` validates the config and restores the last snapshot
//! 2. `start` spawns the background workers
//! 3. Foreground calls: `record_turn`, `assemble`, `query_relevant`
//! 4. `shutdown` stops the workers, then writes a final snapshot

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SageConfig;
use crate::context::{ContextAssembler, ContextBundle};
use crate::embedding::{Embedder, EmbeddingIndex, HashingEmbedder};
use crate::persistence::{SnapshotStore, open_store};
use crate::salience::{HeuristicSalience, SalienceStrategy};
use crate::scheduler::{
    DurabilityWarning, EnqueueOutcome, Job, JobHandler, JobPayload, JobQueue, ShutdownReport,
    TaskScheduler,
};
use crate::store::MemoryStore;
use crate::types::{MemoryEntry, MemoryStats, RankedEntry, Role};
use crate::{MemoryError, MemoryResult};

/// Executes scheduler jobs against a [`MemoryStore`]
pub struct MemoryJobRunner {
    store: Arc<MemoryStore>,
    persistence: Arc<dyn SnapshotStore>,
}

impl MemoryJobRunner {
    pub fn new(store: Arc<MemoryStore>, persistence: Arc<dyn SnapshotStore>) -> Self {
        Self { store, persistence }
    }
}

#[async_trait]
impl JobHandler for MemoryJobRunner {
    async fn handle(&self, job: &Job) -> MemoryResult<()> {
        match &job.payload {
            JobPayload::Promote { id } => {
                let outcome = self.store.promote_if_salient(*id).await?;
                tracing::trace!(id = %id, ?outcome, "promote job finished");
            }
            JobPayload::Decay => {
                let report = self.store.decay_sweep();
                if report.has_changes() {
                    tracing::info!(
                        lowered = report.lowered,
                        removed = report.total_removed(),
                        "decay sweep applied"
                    );
                }
            }
            JobPayload::Persist => {
                let snapshot = self.store.snapshot();
                self.persistence.save_snapshot(&snapshot).await?;
            }
            JobPayload::Warm { id, hits } => {
                // hits were applied by the first attempt
                let hits = if job.attempt == 1 { *hits } else { 0 };
                self.store.warm(*id, hits).await?;
            }
        }
        Ok(())
    }
}

/// Tiered conversational memory
pub struct SageMemory {
    config: SageConfig,
    store: Arc<MemoryStore>,
    assembler: ContextAssembler,
    persistence: Arc<dyn SnapshotStore>,
    runner: Arc<MemoryJobRunner>,
    scheduler: Option<TaskScheduler>,
}

impl SageMemory {
    /// Build an instance and restore the last saved snapshot, if any
    pub async fn open(
        config: SageConfig,
        embedder: Arc<dyn Embedder>,
        salience: Arc<dyn SalienceStrategy>,
        persistence: Arc<dyn SnapshotStore>,
    ) -> MemoryResult<Self> {
        config.validate()?;

        let jobs = Arc::new(JobQueue::new());
        let index = Arc::new(EmbeddingIndex::new(embedder));
        let store = Arc::new(MemoryStore::new(config.memory.clone(), index, salience, jobs));

        if let Some(snapshot) = persistence.load_snapshot().await? {
            store.restore(snapshot)?;
        }

        let runner = Arc::new(MemoryJobRunner::new(store.clone(), persistence.clone()));
        let assembler = ContextAssembler::new(store.clone());

        tracing::info!(
            store = %persistence.describe(),
            embedder = store.index().embedder().name(),
            entries = store.stats().total(),
            "memory opened"
        );

        Ok(Self {
            config,
            store,
            assembler,
            persistence,
            runner,
            scheduler: None,
        })
    }

    /// Open with the hashing embedder, heuristic salience and the configured
    /// storage backend under `data_dir`
    pub async fn open_in(config: SageConfig, data_dir: &Path) -> MemoryResult<Self> {
        let persistence = open_store(&config, data_dir)?;
        let salience = Arc::new(HeuristicSalience::from_config(&config.memory));
        Self::open(config, Arc::new(HashingEmbedder::default()), salience, persistence).await
    }

    /// Spawn the worker pool; a second call is a no-op
    pub fn start(&mut self) {
        if self.scheduler.is_some() {
            return;
        }
        let handler: Arc<dyn JobHandler> = self.runner.clone();
        self.scheduler = Some(TaskScheduler::start(
            self.store.jobs().clone(),
            handler,
            &self.config.scheduler,
        ));
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn config(&self) -> &SageConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn jobs(&self) -> &Arc<JobQueue> {
        self.store.jobs()
    }

    pub fn persistence(&self) -> &Arc<dyn SnapshotStore> {
        &self.persistence
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Foreground
    // ─────────────────────────────────────────────────────────────────────────

    pub fn record_turn(&self, text: &str) -> MemoryResult<MemoryEntry> {
        self.store.record_turn(text)
    }

    pub fn record_turn_as(&self, role: Role, text: &str, tags: Vec<String>) -> MemoryResult<MemoryEntry> {
        self.store.record_turn_as(role, text, tags)
    }

    pub async fn assemble(&self, query: &str, token_budget: usize) -> MemoryResult<ContextBundle> {
        self.assembler.assemble(query, token_budget).await
    }

    pub async fn query_relevant(&self, query: &str, k: usize) -> MemoryResult<Vec<RankedEntry>> {
        self.store.query_relevant(query, k).await
    }

    pub fn stats(&self) -> MemoryStats {
        self.store.stats()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a decay sweep followed by a snapshot
    pub fn run_maintenance(&self) -> Vec<EnqueueOutcome> {
        vec![
            self.jobs().enqueue(JobPayload::Decay),
            self.jobs().enqueue(JobPayload::Persist),
        ]
    }

    pub fn request_persist(&self) -> EnqueueOutcome {
        self.jobs().enqueue(JobPayload::Persist)
    }

    /// Drain pending jobs on the calling task. Only valid before `start`.
    pub async fn run_pending(&self) -> MemoryResult<usize> {
        if self.scheduler.is_some() {
            return Err(MemoryError::invalid_input(
                "run_pending cannot be used while workers are running",
            ));
        }
        Ok(TaskScheduler::run_until_idle(self.jobs(), self.runner.as_ref(), &self.config.scheduler).await)
    }

    /// Wait for the workers to settle every pending job
    pub async fn wait_idle(&self) {
        self.jobs().wait_idle().await;
    }

    pub fn warnings(&self) -> Vec<DurabilityWarning> {
        self.jobs().warnings()
    }

    /// Write a snapshot immediately, bypassing the queue
    pub async fn save_now(&self) -> MemoryResult<()> {
        let snapshot = self.store.snapshot();
        self.persistence.save_snapshot(&snapshot).await?;
        tracing::debug!(entries = snapshot.entry_count(), "snapshot saved");
        Ok(())
    }

    /// Stop the workers, cancel jobs that have not started and save a final
    /// snapshot. A failed final save is returned as the error.
    pub async fn shutdown(mut self) -> MemoryResult<ShutdownReport> {
        let report = match self.scheduler.take() {
            Some(scheduler) => scheduler.shutdown().await,
            None => {
                let cancelled = self.jobs().close();
                let stats = self.jobs().stats();
                ShutdownReport {
                    cancelled,
                    completed: stats.completed,
                    failed: stats.failed,
                    warnings: self.jobs().warnings(),
                }
            }
        };

        self.save_now().await?;
        tracing::info!(cancelled = report.cancelled, "memory shut down");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::persistence::JsonSnapshotStore;
    use crate::salience::FixedSalience;
    use crate::types::Tier;

    async fn open(dir: &Path, salience: f64) -> SageMemory {
        let config = SageConfig::default().with_memory(MemoryConfig {
            short_term_capacity: 3,
            ..MemoryConfig::default()
        });
        SageMemory::open(
            config,
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(FixedSalience(salience)),
            Arc::new(JsonSnapshotStore::new(dir.join("memory.json"))),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let memory = open(dir.path(), 0.3).await;
        assert_eq!(memory.stats().total(), 0);
        assert!(!memory.is_running());
    }

    #[tokio::test]
    async fn test_run_pending_promotes_salient_turns() {
        let dir = tempfile::tempdir().unwrap();
        let memory = open(dir.path(), 0.9).await;
        let entry = memory.record_turn("my sister lives in Lisbon").unwrap();

        memory.run_pending().await.unwrap();

        assert_eq!(memory.store().tier_of(&entry.id), Some(Tier::LongTerm));
        assert!(memory.store().index().contains(&entry.id));
    }

    #[tokio::test]
    async fn test_warm_retry_does_not_double_count_hits() {
        let dir = tempfile::tempdir().unwrap();
        let memory = open(dir.path(), 0.3).await;
        let entry = memory.record_turn("plain words").unwrap();
        memory.run_pending().await.unwrap();

        let runner = MemoryJobRunner::new(memory.store().clone(), memory.persistence().clone());
        let mut job = Job {
            id: crate::scheduler::JobId(99),
            payload: JobPayload::Warm { id: entry.id, hits: 2 },
            priority: 0,
            enqueued_at: chrono::Utc::now(),
            attempt: 1,
            seq: 0,
        };
        runner.handle(&job).await.unwrap();
        job.attempt = 2;
        runner.handle(&job).await.unwrap();

        assert_eq!(memory.store().get(&entry.id).unwrap().access_count, 2);
    }

    #[tokio::test]
    async fn test_shutdown_saves_and_reopen_restores() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = open(dir.path(), 0.3).await;
        memory.start();
        memory.record_turn("first").unwrap();
        memory.record_turn("second").unwrap();
        memory.wait_idle().await;

        let report = memory.shutdown().await.unwrap();
        assert!(report.warnings.is_empty());

        let reopened = open(dir.path(), 0.3).await;
        let texts: Vec<String> = reopened.store().short_term().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_run_pending_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = open(dir.path(), 0.3).await;
        memory.start();
        let err = memory.run_pending().await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput { .. }));
        memory.shutdown().await.unwrap();
    }
}
