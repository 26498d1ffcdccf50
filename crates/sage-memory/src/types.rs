//! Memory Type Definitions
//!
//! Defines the core types shared by the store, index, assembler and
//! persistence layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::content_hash;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Unique memory entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the hyphenated string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EntryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a conversational turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Speaker label used in rendered transcripts
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::System => "System",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Memory tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    ShortTerm,
    LongTerm,
}

impl Tier {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "short_term" => Some(Self::ShortTerm),
            "long_term" => Some(Self::LongTerm),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single remembered conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: EntryId,
    pub text: String,
    pub role: Role,
    #[serde(default)]
    pub tags: Vec<String>,
    /// SHA-256 of `text`, used to reuse embeddings of identical turns
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub tier: Tier,
    pub salience: f64,
    /// Present iff the entry has been indexed
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u32,
}

impl MemoryEntry {
    /// Create a fresh short-term entry
    pub fn new(
        text: impl Into<String>,
        role: Role,
        tags: Vec<String>,
        salience: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let text = text.into();
        let content_hash = content_hash(&text);
        Self {
            id: EntryId::new(),
            text,
            role,
            tags,
            content_hash,
            created_at: now,
            tier: Tier::ShortTerm,
            salience: salience.clamp(0.0, 1.0),
            embedding: None,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Whether the entry carries an embedding
    pub fn is_indexed(&self) -> bool {
        self.embedding.is_some()
    }

    /// "Role: text" line used by transcripts and rendered bundles
    pub fn render_line(&self) -> String {
        format!("{}: {}", self.role.label(), self.text)
    }
}

/// Persisted vector for one indexed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: EntryId,
    pub vector: Vec<f32>,
}

/// Full persisted state of the memory store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    /// End of the interval already covered by decay sweeps
    #[serde(default)]
    pub last_decay_at: Option<DateTime<Utc>>,
    /// Oldest first; embeddings travel in `vectors`
    pub short_term: Vec<MemoryEntry>,
    /// Ordered by id
    pub long_term: Vec<MemoryEntry>,
    /// Ordered by id
    pub vectors: Vec<IndexRecord>,
}

impl Snapshot {
    /// Empty snapshot stamped with `saved_at`
    pub fn empty(saved_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            last_decay_at: None,
            short_term: Vec::new(),
            long_term: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.short_term.len() + self.long_term.len()
    }
}

/// Where a retrieved entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    /// Recent short-term turn, ranked by recency
    Recent,
    /// Long-term entry, ranked by similarity
    Similar,
}

/// An entry selected for a query, with its priority score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub entry: MemoryEntry,
    pub score: f64,
    pub source: RetrievalSource,
}

/// Result of a promotion request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// Moved from short-term to long-term
    Promoted { indexed: bool },
    /// Entry was already long-term; nothing moved
    AlreadyLongTerm,
    /// No entry with this id in either tier
    NotFound,
    /// Short-term entry below the promotion threshold
    BelowThreshold,
}

/// Result of one decay sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayReport {
    /// Long-term entries visited
    pub examined: usize,
    /// Entries whose salience was lowered
    pub lowered: usize,
    /// Entries removed for being stale and below the floor
    pub removed: usize,
    /// Entries removed by the long-term capacity trim
    pub trimmed: usize,
    /// Sweep stopped early because the scheduler is shutting down
    pub interrupted: bool,
    pub duration_ms: u64,
}

impl DecayReport {
    pub fn has_changes(&self) -> bool {
        self.lowered > 0 || self.removed > 0 || self.trimmed > 0
    }

    pub fn total_removed(&self) -> usize {
        self.removed + self.trimmed
    }
}

/// Substring search over both tiers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Case-insensitive substring of the entry text
    pub text: Option<String>,
    /// Exact tag (case-insensitive)
    pub tag: Option<String>,
    pub role: Option<Role>,
    pub tier: Option<Tier>,
    pub limit: Option<usize>,
}

impl SearchFilter {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` satisfies every set criterion
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if let Some(role) = self.role {
            if entry.role != role {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if entry.tier != tier {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !entry.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            if !entry.text.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub short_term_count: usize,
    pub long_term_count: usize,
    /// Entries present in the embedding index
    pub indexed_count: usize,
    /// Long-term entries still waiting for an embedding
    pub unindexed_long_term: usize,
    pub avg_salience_short_term: f64,
    pub avg_salience_long_term: f64,
}

impl MemoryStats {
    pub fn total(&self) -> usize {
        self.short_term_count + self.long_term_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str, role: Role, tags: &[&str]) -> MemoryEntry {
        MemoryEntry::new(
            text,
            role,
            tags.iter().map(|t| t.to_string()).collect(),
            0.5,
            Utc::now(),
        )
    }

    #[test]
    fn test_tier_conversion() {
        assert_eq!(Tier::from_str("short_term"), Some(Tier::ShortTerm));
        assert_eq!(Tier::LongTerm.as_str(), "long_term");
        assert_eq!(Tier::from_str("working"), None);
    }

    #[test]
    fn test_role_conversion() {
        assert_eq!(Role::from_str("assistant"), Some(Role::Assistant));
        assert_eq!(Role::User.label(), "User");
    }

    #[test]
    fn test_new_entry_defaults() {
        let e = MemoryEntry::new("hello", Role::User, vec![], 1.7, Utc::now());
        assert_eq!(e.tier, Tier::ShortTerm);
        assert_eq!(e.salience, 1.0);
        assert!(!e.is_indexed());
        assert_eq!(e.created_at, e.last_accessed);
        assert_eq!(e.content_hash, content_hash("hello"));
        assert_eq!(e.render_line(), "User: hello");
    }

    #[test]
    fn test_entry_id_parse() {
        let id = EntryId::new();
        assert_eq!(EntryId::parse(&id.to_string()), Some(id));
        assert_eq!(EntryId::parse("nope"), None);
    }

    #[test]
    fn test_search_filter() {
        let e = entry("I love Hiking in the Alps", Role::User, &["Hobby"]);

        assert!(SearchFilter::text("hiking").matches(&e));
        assert!(SearchFilter::text("hiking").with_tag("hobby").matches(&e));
        assert!(!SearchFilter::text("hiking").with_role(Role::Assistant).matches(&e));
        assert!(!SearchFilter::default().with_tier(Tier::LongTerm).matches(&e));
        assert!(!SearchFilter::text("sailing").matches(&e));
    }

    #[test]
    fn test_decay_report_changes() {
        let mut report = DecayReport::default();
        assert!(!report.has_changes());
        report.trimmed = 2;
        report.removed = 1;
        assert!(report.has_changes());
        assert_eq!(report.total_removed(), 3);
    }
}
