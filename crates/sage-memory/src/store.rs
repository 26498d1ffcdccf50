//! Tiered Memory Store
//!
//! Owns the short-term buffer and the long-term store and decides what is
//! kept. Foreground calls (`record_turn`, `query_relevant`) only read or
//! append; promotion, decay and access bookkeeping run from background
//! jobs that the store enqueues on the shared [`JobQueue`].
//!
//! # Locking
//!
//! Both tiers live behind one `RwLock`. The [`EmbeddingIndex`] has its own
//! lock, always taken after the tiers lock, and every tier mutation that
//! touches the index holds the tiers write lock while doing so. Embeddings
//! are computed with no lock held.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::MemoryConfig;
use crate::embedding::{EmbeddingIndex, normalize_similarity};
use crate::salience::SalienceStrategy;
use crate::scheduler::{JobPayload, JobQueue};
use crate::types::{
    DecayReport, EntryId, MemoryEntry, MemoryStats, PromoteOutcome, RankedEntry,
    RetrievalSource, Role, SNAPSHOT_VERSION, SearchFilter, Snapshot, Tier,
};
use crate::utils::{read_lock, write_lock};
use crate::{MemoryError, MemoryResult};

#[derive(Default)]
struct Tiers {
    /// Oldest at the front
    short_term: VecDeque<MemoryEntry>,
    long_term: HashMap<EntryId, MemoryEntry>,
    last_decay_at: Option<DateTime<Utc>>,
}

impl Tiers {
    fn get(&self, id: &EntryId) -> Option<&MemoryEntry> {
        self.long_term
            .get(id)
            .or_else(|| self.short_term.iter().find(|e| e.id == *id))
    }

    fn get_mut(&mut self, id: &EntryId) -> Option<&mut MemoryEntry> {
        match self.long_term.get_mut(id) {
            Some(entry) => Some(entry),
            None => self.short_term.iter_mut().find(|e| e.id == *id),
        }
    }

    fn short_term_position(&self, id: &EntryId) -> Option<usize> {
        self.short_term.iter().position(|e| e.id == *id)
    }

    /// Embedding of any entry with the same text
    fn cached_embedding(&self, content_hash: &str) -> Option<Vec<f32>> {
        self.short_term
            .iter()
            .chain(self.long_term.values())
            .find(|e| e.content_hash == content_hash && e.embedding.is_some())
            .and_then(|e| e.embedding.clone())
    }
}

/// Short-term buffer plus long-term store
pub struct MemoryStore {
    config: MemoryConfig,
    index: Arc<EmbeddingIndex>,
    salience: Arc<dyn SalienceStrategy>,
    jobs: Arc<JobQueue>,
    tiers: RwLock<Tiers>,
}

impl MemoryStore {
    pub fn new(
        config: MemoryConfig,
        index: Arc<EmbeddingIndex>,
        salience: Arc<dyn SalienceStrategy>,
        jobs: Arc<JobQueue>,
    ) -> Self {
        Self {
            config,
            index,
            salience,
            jobs,
            tiers: RwLock::new(Tiers::default()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    pub fn jobs(&self) -> &Arc<JobQueue> {
        &self.jobs
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recording
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a user turn
    pub fn record_turn(&self, text: &str) -> MemoryResult<MemoryEntry> {
        self.record_turn_as(Role::User, text, Vec::new())
    }

    /// Record a turn, evicting the oldest short-term entry when over capacity
    pub fn record_turn_as(&self, role: Role, text: &str, tags: Vec<String>) -> MemoryResult<MemoryEntry> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::invalid_input("turn text must not be empty"));
        }

        let salience = self.salience.initial(text, role);
        let mut entry = MemoryEntry::new(text, role, tags, salience, Utc::now());

        let mut follow_up = vec![JobPayload::Promote { id: entry.id }];
        {
            let mut tiers = write_lock(&self.tiers);

            if let Some(vector) = tiers.cached_embedding(&entry.content_hash) {
                if self.index.insert(entry.id, &vector, entry.last_accessed).is_ok() {
                    entry.embedding = Some(vector);
                }
            }

            tiers.short_term.push_back(entry.clone());
            self.evict_overflow(&mut tiers, &mut follow_up);
        }

        for payload in follow_up {
            self.jobs.enqueue(payload);
        }

        tracing::debug!(id = %entry.id, role = %role, salience = entry.salience, "recorded turn");
        Ok(entry)
    }

    /// Pop entries past capacity; salient ones move to long-term
    fn evict_overflow(&self, tiers: &mut Tiers, follow_up: &mut Vec<JobPayload>) {
        while tiers.short_term.len() > self.config.short_term_capacity {
            let Some(mut evicted) = tiers.short_term.pop_front() else {
                break;
            };

            if evicted.salience >= self.config.evict_promote_threshold {
                evicted.tier = Tier::LongTerm;
                let rejected = match &evicted.embedding {
                    Some(vector) if !self.index.contains(&evicted.id) => self
                        .index
                        .insert(evicted.id, vector, evicted.last_accessed)
                        .is_err(),
                    _ => false,
                };
                if rejected {
                    evicted.embedding = None;
                }
                if evicted.embedding.is_none() {
                    follow_up.push(JobPayload::Warm { id: evicted.id, hits: 0 });
                }
                tracing::debug!(id = %evicted.id, salience = evicted.salience, "evicted entry promoted to long-term");
                tiers.long_term.insert(evicted.id, evicted);
            } else {
                self.index.remove(&evicted.id);
                tracing::debug!(id = %evicted.id, salience = evicted.salience, "evicted entry discarded");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Promotion
    // ─────────────────────────────────────────────────────────────────────────

    /// Move a short-term entry to long-term regardless of salience
    pub async fn promote(&self, id: EntryId) -> MemoryResult<PromoteOutcome> {
        self.promote_with(id, false).await
    }

    /// Promote only if salience reaches the promotion threshold
    pub async fn promote_if_salient(&self, id: EntryId) -> MemoryResult<PromoteOutcome> {
        self.promote_with(id, true).await
    }

    async fn promote_with(&self, id: EntryId, require_threshold: bool) -> MemoryResult<PromoteOutcome> {
        let (text, cached) = {
            let tiers = read_lock(&self.tiers);
            if let Some(entry) = tiers.long_term.get(&id) {
                if entry.embedding.is_some() {
                    return Ok(PromoteOutcome::AlreadyLongTerm);
                }
                (entry.text.clone(), tiers.cached_embedding(&entry.content_hash))
            } else if let Some(pos) = tiers.short_term_position(&id) {
                let entry = &tiers.short_term[pos];
                if require_threshold && entry.salience < self.config.promote_threshold {
                    return Ok(PromoteOutcome::BelowThreshold);
                }
                let cached = entry
                    .embedding
                    .clone()
                    .or_else(|| tiers.cached_embedding(&entry.content_hash));
                (entry.text.clone(), cached)
            } else {
                return Ok(PromoteOutcome::NotFound);
            }
        };

        let vector = match cached {
            Some(vector) => Some(vector),
            None => match self.index.embed(&text).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "embedding failed, entry stays un-indexed");
                    None
                }
            },
        };

        let outcome = {
            let mut tiers = write_lock(&self.tiers);
            if let Some(pos) = tiers.short_term_position(&id) {
                let Some(mut entry) = tiers.short_term.remove(pos) else {
                    return Ok(PromoteOutcome::NotFound);
                };
                entry.tier = Tier::LongTerm;
                entry.embedding = self.attach(&entry, vector);
                let indexed = entry.embedding.is_some();
                tracing::info!(id = %id, salience = entry.salience, indexed, "promoted to long-term");
                tiers.long_term.insert(id, entry);
                PromoteOutcome::Promoted { indexed }
            } else if let Some(entry) = tiers.long_term.get_mut(&id) {
                if entry.embedding.is_none() {
                    entry.embedding = self.attach(entry, vector);
                }
                PromoteOutcome::AlreadyLongTerm
            } else {
                PromoteOutcome::NotFound
            }
        };

        let needs_warm = {
            let tiers = read_lock(&self.tiers);
            tiers.long_term.get(&id).is_some_and(|e| e.embedding.is_none())
        };
        if needs_warm {
            self.jobs.enqueue(JobPayload::Warm { id, hits: 0 });
        }

        Ok(outcome)
    }

    /// Index `vector` for `entry`; returns the embedding to store on it.
    /// Caller holds the tiers write lock.
    fn attach(&self, entry: &MemoryEntry, vector: Option<Vec<f32>>) -> Option<Vec<f32>> {
        let vector = vector?;
        match self.index.insert(entry.id, &vector, entry.last_accessed) {
            Ok(()) => Some(vector),
            Err(e) => {
                tracing::warn!(id = %entry.id, error = %e, "rejected embedding");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Access bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue access bookkeeping for retrieved entries
    pub fn record_access(&self, ids: &[EntryId]) {
        for id in ids {
            self.jobs.enqueue(JobPayload::Warm { id: *id, hits: 1 });
        }
    }

    /// Add `hits` retrievals to an entry and index it if it has no embedding.
    ///
    /// Returns `Ok(false)` when the entry no longer exists. A long-term
    /// entry that still cannot be embedded is an `IndexingFailure` so the
    /// job is retried; hits are applied before that.
    pub async fn warm(&self, id: EntryId, hits: u32) -> MemoryResult<bool> {
        let pending = {
            let tiers = read_lock(&self.tiers);
            let Some(entry) = tiers.get(&id) else {
                return Ok(false);
            };
            if entry.embedding.is_some() {
                None
            } else {
                Some((entry.text.clone(), tiers.cached_embedding(&entry.content_hash)))
            }
        };

        let embedded = match pending {
            None => None,
            Some((_, Some(cached))) => Some(Ok(cached)),
            Some((text, None)) => Some(self.index.embed(&text).await),
        };

        let now = Utc::now();
        let mut tiers = write_lock(&self.tiers);
        let Some(entry) = tiers.get_mut(&id) else {
            return Ok(false);
        };

        if hits > 0 {
            entry.access_count = entry.access_count.saturating_add(hits);
            entry.last_accessed = now;
            self.index.touch(&id, now);
        }

        match embedded {
            Some(Ok(vector)) if entry.embedding.is_none() => {
                entry.embedding = self.attach(entry, Some(vector));
                Ok(true)
            }
            Some(Err(e)) if entry.tier == Tier::LongTerm && entry.embedding.is_none() => Err(e),
            Some(Err(e)) => {
                tracing::debug!(id = %id, error = %e, "short-term entry left un-indexed");
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decay
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one decay sweep at the current time
    pub fn decay_sweep(&self) -> DecayReport {
        self.decay_sweep_at(Utc::now())
    }

    /// Run one decay sweep as of `now`.
    ///
    /// The sweep claims the interval since the previous sweep before touching
    /// any entry, so overlapping sweeps never charge the same idle time
    /// twice. Each long-term entry is then handled under its own short write
    /// lock. The sweep stops early once the job queue closes.
    pub fn decay_sweep_at(&self, now: DateTime<Utc>) -> DecayReport {
        let started = Instant::now();
        let mut report = DecayReport::default();
        let retention = self.config.retention_window();

        let (mut ids, since) = {
            let mut tiers = write_lock(&self.tiers);
            let since = tiers.last_decay_at;
            tiers.last_decay_at = Some(since.map_or(now, |since| since.max(now)));
            (tiers.long_term.keys().copied().collect::<Vec<_>>(), since)
        };
        ids.sort();

        for id in ids {
            if self.jobs.is_closed() {
                report.interrupted = true;
                break;
            }

            let mut tiers = write_lock(&self.tiers);
            let Some(entry) = tiers.long_term.get_mut(&id) else {
                continue;
            };
            report.examined += 1;

            let idle_from = match since {
                Some(since) if since > entry.last_accessed => since,
                _ => entry.last_accessed,
            };
            let decayed = self.salience.decayed(entry, now - idle_from, now);
            if decayed < entry.salience {
                entry.salience = decayed.max(0.0);
                report.lowered += 1;
            }

            let stale = now - entry.last_accessed > retention;
            if entry.salience < self.config.salience_floor && stale {
                tiers.long_term.remove(&id);
                self.index.remove(&id);
                report.removed += 1;
                tracing::debug!(id = %id, "decayed entry removed");
            }
        }

        if !report.interrupted {
            let mut tiers = write_lock(&self.tiers);
            report.trimmed = self.trim_long_term(&mut tiers);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            examined = report.examined,
            lowered = report.lowered,
            removed = report.removed,
            trimmed = report.trimmed,
            interrupted = report.interrupted,
            "decay sweep finished"
        );
        report
    }

    /// Drop the lowest-salience, least recently accessed entries above the
    /// configured cap. Without a cap nothing is trimmed.
    fn trim_long_term(&self, tiers: &mut Tiers) -> usize {
        let Some(capacity) = self.config.long_term_capacity else {
            return 0;
        };
        let excess = tiers.long_term.len().saturating_sub(capacity);
        if excess == 0 {
            return 0;
        }

        let mut order: Vec<(f64, DateTime<Utc>, EntryId)> = tiers
            .long_term
            .values()
            .map(|e| (e.salience, e.last_accessed, e.id))
            .collect();
        order.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        for (_, _, id) in order.into_iter().take(excess) {
            tiers.long_term.remove(&id);
            self.index.remove(&id);
        }
        excess
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retrieval
    // ─────────────────────────────────────────────────────────────────────────

    /// Rank up to `k` entries for `query` and queue access bookkeeping for them
    pub async fn query_relevant(&self, query: &str, k: usize) -> MemoryResult<Vec<RankedEntry>> {
        let ranked = self.candidates(query, k).await?;
        let ids: Vec<EntryId> = ranked.iter().map(|r| r.entry.id).collect();
        self.record_access(&ids);
        Ok(ranked)
    }

    /// Rank up to `k` entries for `query` without side effects.
    ///
    /// The most recent short-term turns come first by recency; the rest of
    /// the slots go to long-term entries by similarity. When the query
    /// cannot be embedded the ranking is recency-only.
    pub async fn candidates(&self, query: &str, k: usize) -> MemoryResult<Vec<RankedEntry>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = match self.index.embed(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::debug!(error = %e, "query not embeddable, using recency only");
                None
            }
        };

        let tiers = read_lock(&self.tiers);
        Ok(self.rank(&tiers, query_vector.as_deref(), k))
    }

    fn rank(&self, tiers: &Tiers, query: Option<&[f32]>, k: usize) -> Vec<RankedEntry> {
        let recent_slots = match query {
            Some(_) => self.config.recent_count.min(k),
            None => k,
        };

        let mut ranked: Vec<RankedEntry> = tiers
            .short_term
            .iter()
            .rev()
            .take(recent_slots)
            .enumerate()
            .map(|(rank, entry)| RankedEntry {
                entry: entry.clone(),
                score: self.config.short_term_weight / (1.0 + rank as f64),
                source: RetrievalSource::Recent,
            })
            .collect();

        if let Some(query) = query {
            let remaining = k - ranked.len();
            let hits = self
                .index
                .search_vector_where(query, remaining, |id| tiers.long_term.contains_key(id));
            ranked.extend(hits.into_iter().filter_map(|(id, similarity)| {
                tiers.long_term.get(&id).map(|entry| RankedEntry {
                    entry: entry.clone(),
                    score: normalize_similarity(similarity) as f64,
                    source: RetrievalSource::Similar,
                })
            }));
        }

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        let mut seen = HashSet::new();
        ranked.retain(|r| seen.insert(r.entry.id));
        ranked.truncate(k);
        ranked
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get(&self, id: &EntryId) -> Option<MemoryEntry> {
        read_lock(&self.tiers).get(id).cloned()
    }

    /// Which tier holds `id`
    pub fn tier_of(&self, id: &EntryId) -> Option<Tier> {
        read_lock(&self.tiers).get(id).map(|e| e.tier)
    }

    /// Substring search across both tiers; newest first
    pub fn search(&self, filter: &SearchFilter) -> Vec<MemoryEntry> {
        let tiers = read_lock(&self.tiers);
        let mut found: Vec<MemoryEntry> = tiers
            .short_term
            .iter()
            .chain(tiers.long_term.values())
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        drop(tiers);

        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        found
    }

    /// Short-term entries, oldest first
    pub fn short_term(&self) -> Vec<MemoryEntry> {
        read_lock(&self.tiers).short_term.iter().cloned().collect()
    }

    /// Long-term entries ordered by id
    pub fn long_term(&self) -> Vec<MemoryEntry> {
        let tiers = read_lock(&self.tiers);
        let mut entries: Vec<MemoryEntry> = tiers.long_term.values().cloned().collect();
        drop(tiers);
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// "Role: text" lines for the last `limit` short-term turns, oldest first
    pub fn recent_transcript(&self, limit: usize) -> String {
        let tiers = read_lock(&self.tiers);
        let skip = tiers.short_term.len().saturating_sub(limit);
        tiers
            .short_term
            .iter()
            .skip(skip)
            .map(MemoryEntry::render_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Most recent user turn still in short-term memory
    pub fn last_user_turn(&self) -> Option<MemoryEntry> {
        read_lock(&self.tiers)
            .short_term
            .iter()
            .rev()
            .find(|e| e.role == Role::User)
            .cloned()
    }

    /// Drop every short-term entry; long-term memory is kept
    pub fn clear_short_term(&self) -> usize {
        let mut tiers = write_lock(&self.tiers);
        let cleared = tiers.short_term.len();
        for entry in tiers.short_term.drain(..) {
            self.index.remove(&entry.id);
        }
        tracing::info!(cleared, "cleared short-term memory");
        cleared
    }

    pub fn stats(&self) -> MemoryStats {
        let tiers = read_lock(&self.tiers);
        let avg = |values: Vec<f64>| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        MemoryStats {
            short_term_count: tiers.short_term.len(),
            long_term_count: tiers.long_term.len(),
            indexed_count: self.index.len(),
            unindexed_long_term: tiers.long_term.values().filter(|e| e.embedding.is_none()).count(),
            avg_salience_short_term: avg(tiers.short_term.iter().map(|e| e.salience).collect()),
            avg_salience_long_term: avg(tiers.long_term.values().map(|e| e.salience).collect()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────────────

    /// Consistent copy of both tiers and the index
    pub fn snapshot(&self) -> Snapshot {
        let tiers = read_lock(&self.tiers);
        let strip = |e: &MemoryEntry| MemoryEntry {
            embedding: None,
            ..e.clone()
        };

        let short_term: Vec<MemoryEntry> = tiers.short_term.iter().map(strip).collect();
        let mut long_term: Vec<MemoryEntry> = tiers.long_term.values().map(strip).collect();
        long_term.sort_by(|a, b| a.id.cmp(&b.id));

        let vectors = self
            .index
            .records()
            .into_iter()
            .filter(|r| tiers.get(&r.id).is_some_and(|e| e.embedding.is_some()))
            .collect();

        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            last_decay_at: tiers.last_decay_at,
            short_term,
            long_term,
            vectors,
        }
    }

    /// Replace all state with `snapshot`.
    ///
    /// Vectors whose length does not match the current embedder are dropped
    /// and the affected long-term entries are queued for re-indexing.
    pub fn restore(&self, snapshot: Snapshot) -> MemoryResult<()> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(MemoryError::persistence(format!(
                "snapshot version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut vectors: HashMap<EntryId, Vec<f32>> =
            snapshot.vectors.into_iter().map(|r| (r.id, r.vector)).collect();
        let mut follow_up = Vec::new();
        let mut seen = HashSet::new();
        let mut dropped_vectors = 0usize;

        let mut tiers = write_lock(&self.tiers);
        self.index.clear();
        *tiers = Tiers {
            last_decay_at: snapshot.last_decay_at,
            ..Tiers::default()
        };

        let restored = snapshot
            .short_term
            .into_iter()
            .map(|e| (Tier::ShortTerm, e))
            .chain(snapshot.long_term.into_iter().map(|e| (Tier::LongTerm, e)));

        for (tier, mut entry) in restored {
            if !seen.insert(entry.id) {
                tracing::warn!(id = %entry.id, "duplicate entry in snapshot skipped");
                continue;
            }
            entry.tier = tier;
            entry.embedding = None;

            if let Some(vector) = vectors.remove(&entry.id) {
                match self.index.insert(entry.id, &vector, entry.last_accessed) {
                    Ok(()) => entry.embedding = Some(vector),
                    Err(_) => dropped_vectors += 1,
                }
            }

            match tier {
                Tier::ShortTerm => {
                    // promotions cancelled at the last shutdown get another chance
                    follow_up.push(JobPayload::Promote { id: entry.id });
                    tiers.short_term.push_back(entry);
                }
                Tier::LongTerm => {
                    if entry.embedding.is_none() {
                        follow_up.push(JobPayload::Warm { id: entry.id, hits: 0 });
                    }
                    tiers.long_term.insert(entry.id, entry);
                }
            }
        }

        self.evict_overflow(&mut tiers, &mut follow_up);
        let (short, long) = (tiers.short_term.len(), tiers.long_term.len());
        drop(tiers);

        for payload in follow_up {
            self.jobs.enqueue(payload);
        }

        if dropped_vectors > 0 {
            tracing::warn!(dropped_vectors, "snapshot vectors do not match the embedder; re-indexing");
        }
        tracing::info!(short_term = short, long_term = long, "restored memory snapshot");
        Ok(())
    }
}
