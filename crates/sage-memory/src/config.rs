//! Memory Configuration
//!
//! Defines configuration options for the memory subsystem. Every section
//! deserializes from TOML with per-field defaults, so a config file only
//! needs to name the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SageConfig {
    /// Memory store and retrieval configuration
    pub memory: MemoryConfig,

    /// Background scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Snapshot storage configuration
    pub storage: StorageConfig,
}

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Short-term buffer capacity (default: 50)
    pub short_term_capacity: usize,

    /// Optional cap on long-term entries, enforced after each decay sweep by
    /// dropping the lowest-salience entries even when they are still fresh
    /// (default: none)
    pub long_term_capacity: Option<usize>,

    /// Salience at which a short-term entry is promoted (default: 0.75)
    pub promote_threshold: f64,

    /// Salience at which an evicted entry is promoted instead of dropped (default: 0.45)
    pub evict_promote_threshold: f64,

    /// Long-term entries below this salience are decay candidates (default: 0.15)
    pub salience_floor: f64,

    /// Decay candidates accessed within this window are kept (default: 30 days)
    pub retention_window_secs: u64,

    /// Salience half-life for an idle, never-retrieved entry (default: 7 days)
    pub decay_half_life_secs: u64,

    /// Recent short-term turns always offered to the assembler (default: 6)
    pub recent_count: usize,

    /// Candidates fetched per assemble call (default: 32)
    pub candidate_pool: usize,

    /// Priority boost for short-term entries (default: 1.2)
    pub short_term_weight: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: 50,
            long_term_capacity: None,
            promote_threshold: 0.75,
            evict_promote_threshold: 0.45,
            salience_floor: 0.15,
            retention_window_secs: 30 * 86400, // 30 days
            decay_half_life_secs: 7 * 86400,   // 7 days
            recent_count: 6,
            candidate_pool: 32,
            short_term_weight: 1.2,
        }
    }
}

impl MemoryConfig {
    /// Retention window as a chrono duration
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_window_secs.min(i64::MAX as u64) as i64)
    }
}

/// Background scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker tasks draining the job queue (default: 2)
    pub workers: usize,

    /// Attempts per job before it is dropped (default: 3)
    pub max_attempts: u32,

    /// First retry delay in milliseconds (default: 250)
    pub base_backoff_ms: u64,

    /// Retry delay ceiling in milliseconds (default: 30000)
    pub max_backoff_ms: u64,

    /// Bound on a single persistence attempt in milliseconds (default: 10000)
    pub persist_timeout_ms: u64,

    /// Add random jitter to retry delays (default: true)
    pub jitter: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 30_000,
            persist_timeout_ms: 10_000,
            jitter: true,
        }
    }
}

impl SchedulerConfig {
    /// Persistence attempt bound
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}

/// Snapshot backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sqlite,
    Json,
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot backend (default: sqlite)
    pub backend: StorageBackend,

    /// Snapshot location; relative paths resolve against the data directory
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from("memory.db"),
        }
    }
}

impl SageConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigValidationError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigValidationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set memory configuration
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Set scheduler configuration
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set storage configuration
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let memory = &self.memory;

        if memory.short_term_capacity == 0 {
            return Err(invalid("memory.short_term_capacity", "must be greater than 0"));
        }

        if memory.long_term_capacity == Some(0) {
            return Err(invalid("memory.long_term_capacity", "must be greater than 0"));
        }

        for (field, value) in [
            ("memory.promote_threshold", memory.promote_threshold),
            ("memory.evict_promote_threshold", memory.evict_promote_threshold),
            ("memory.salience_floor", memory.salience_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, "must be between 0 and 1"));
            }
        }

        if memory.evict_promote_threshold > memory.promote_threshold {
            return Err(invalid(
                "memory.evict_promote_threshold",
                "must not exceed memory.promote_threshold",
            ));
        }

        if memory.decay_half_life_secs == 0 {
            return Err(invalid("memory.decay_half_life_secs", "must be greater than 0"));
        }

        if memory.candidate_pool == 0 {
            return Err(invalid("memory.candidate_pool", "must be greater than 0"));
        }

        if !(memory.short_term_weight.is_finite() && memory.short_term_weight > 0.0) {
            return Err(invalid("memory.short_term_weight", "must be a positive number"));
        }

        if self.scheduler.workers == 0 {
            return Err(invalid("scheduler.workers", "must be greater than 0"));
        }

        if self.scheduler.max_attempts == 0 {
            return Err(invalid("scheduler.max_attempts", "must be greater than 0"));
        }

        if self.scheduler.base_backoff_ms > self.scheduler.max_backoff_ms {
            return Err(invalid(
                "scheduler.base_backoff_ms",
                "must not exceed scheduler.max_backoff_ms",
            ));
        }

        if self.scheduler.persist_timeout_ms == 0 {
            return Err(invalid("scheduler.persist_timeout_ms", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
