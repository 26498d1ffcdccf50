//! SQLite snapshot store
//!
//! Entries and vectors live in `memory_entries` / `memory_vectors`;
//! `snapshot_meta` holds the format version and timestamps. Every save is a
//! single transaction that replaces the previous snapshot.
//!
//! rusqlite is blocking, so loads and saves run on the blocking pool and the
//! caller awaits the join handle. A caller-side timeout therefore ends the
//! attempt on time; the abandoned write finishes or fails on its own within
//! the connection's busy timeout.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::SnapshotStore;
use crate::types::{EntryId, IndexRecord, MemoryEntry, Role, SNAPSHOT_VERSION, Snapshot, Tier};
use crate::utils::{format_datetime, lock, parse_datetime};
use crate::{MemoryError, MemoryResult};

use super::migrations::run_migrations;

/// How long a statement waits on another connection's lock by default
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot store backed by a SQLite database file
pub struct SqliteSnapshotStore {
    db: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database at `path` and apply migrations
    pub fn open(path: impl AsRef<Path>) -> MemoryResult<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with a bound on how long a write waits for a locked database.
    ///
    /// Keep it at or below the persist timeout so an abandoned attempt does
    /// not hold the connection past the next one.
    pub fn open_with_busy_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> MemoryResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;

        tracing::debug!(
            path = %path.display(),
            busy_timeout_ms = busy_timeout.as_millis() as u64,
            "opened sqlite snapshot store"
        );
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Database that lives only as long as this store
    pub fn open_in_memory() -> MemoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> MemoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> MemoryResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&db);
            f(&mut conn)
        })
        .await
        .map_err(|e| MemoryError::persistence(format!("sqlite task failed: {}", e)))?
    }

    fn read_snapshot(conn: &Connection) -> MemoryResult<Option<Snapshot>> {
        let Some(version) = Self::read_meta(conn, "version")? else {
            return Ok(None);
        };
        let version: u32 = version
            .parse()
            .map_err(|_| MemoryError::persistence(format!("invalid snapshot version: {}", version)))?;
        if version > SNAPSHOT_VERSION {
            return Err(MemoryError::persistence(format!(
                "snapshot version {} is newer than supported version {}",
                version, SNAPSHOT_VERSION
            )));
        }
        let saved_at = Self::read_meta(conn, "saved_at")?
            .as_deref()
            .and_then(parse_datetime)
            .ok_or_else(|| MemoryError::persistence("snapshot is missing saved_at"))?;
        let last_decay_at = match Self::read_meta(conn, "last_decay_at")? {
            Some(value) => Some(
                parse_datetime(&value)
                    .ok_or_else(|| MemoryError::persistence(format!("invalid last_decay_at: {}", value)))?,
            ),
            None => None,
        };

        Ok(Some(Snapshot {
            version,
            saved_at,
            last_decay_at,
            short_term: Self::read_entries(conn, Tier::ShortTerm)?,
            long_term: Self::read_entries(conn, Tier::LongTerm)?,
            vectors: Self::read_vectors(conn)?,
        }))
    }

    fn write_snapshot(conn: &mut Connection, snapshot: &Snapshot) -> MemoryResult<()> {
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM memory_vectors", [])?;
        tx.execute("DELETE FROM memory_entries", [])?;
        tx.execute("DELETE FROM snapshot_meta", [])?;

        for (position, entry) in snapshot.short_term.iter().enumerate() {
            Self::write_entry(&tx, entry, Tier::ShortTerm, position)?;
        }
        for (position, entry) in snapshot.long_term.iter().enumerate() {
            Self::write_entry(&tx, entry, Tier::LongTerm, position)?;
        }
        for record in &snapshot.vectors {
            tx.execute(
                "INSERT INTO memory_vectors (entry_id, dimensions, vector) VALUES (?1, ?2, ?3)",
                params![record.id.to_string(), record.vector.len() as i64, encode_vector(&record.vector)],
            )?;
        }

        let mut meta = vec![
            ("version", snapshot.version.to_string()),
            ("saved_at", format_datetime(&snapshot.saved_at)),
        ];
        if let Some(at) = &snapshot.last_decay_at {
            meta.push(("last_decay_at", format_datetime(at)));
        }
        for (key, value) in meta {
            tx.execute(
                "INSERT INTO snapshot_meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn read_meta(conn: &Connection, key: &str) -> MemoryResult<Option<String>> {
        Ok(conn
            .query_row("SELECT value FROM snapshot_meta WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?)
    }

    fn read_entries(conn: &Connection, tier: Tier) -> MemoryResult<Vec<MemoryEntry>> {
        let mut stmt = conn.prepare(
            "SELECT id, role, text, tags_json, content_hash, salience, access_count, created_at, last_accessed
             FROM memory_entries WHERE tier = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![tier.as_str()], RawEntry::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry(tier)?);
        }
        Ok(entries)
    }

    fn read_vectors(conn: &Connection) -> MemoryResult<Vec<IndexRecord>> {
        let mut stmt = conn.prepare("SELECT entry_id, dimensions, vector FROM memory_vectors ORDER BY entry_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, dimensions, blob) = row?;
            let id = parse_id(&id)?;
            let vector = decode_vector(&blob)?;
            if vector.len() as i64 != dimensions {
                return Err(MemoryError::persistence(format!(
                    "vector for {} has {} values, expected {}",
                    id,
                    vector.len(),
                    dimensions
                )));
            }
            records.push(IndexRecord { id, vector });
        }
        Ok(records)
    }

    fn write_entry(
        tx: &rusqlite::Transaction<'_>,
        entry: &MemoryEntry,
        tier: Tier,
        position: usize,
    ) -> MemoryResult<()> {
        tx.execute(
            "INSERT INTO memory_entries (id, tier, position, role, text, tags_json, content_hash, salience, access_count, created_at, last_accessed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.id.to_string(),
                tier.as_str(),
                position as i64,
                entry.role.as_str(),
                &entry.text,
                serde_json::to_string(&entry.tags)?,
                &entry.content_hash,
                entry.salience,
                entry.access_count as i64,
                format_datetime(&entry.created_at),
                format_datetime(&entry.last_accessed),
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load_snapshot(&self) -> MemoryResult<Option<Snapshot>> {
        self.with_connection(|conn| Self::read_snapshot(conn)).await
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> MemoryResult<()> {
        let owned = snapshot.clone();
        self.with_connection(move |conn| Self::write_snapshot(conn, &owned)).await?;

        tracing::debug!(
            entries = snapshot.entry_count(),
            vectors = snapshot.vectors.len(),
            "saved snapshot to sqlite"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite:{}", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }
}

/// Row columns before validation
struct RawEntry {
    id: String,
    role: String,
    text: String,
    tags_json: String,
    content_hash: String,
    salience: f64,
    access_count: i64,
    created_at: String,
    last_accessed: String,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            role: row.get(1)?,
            text: row.get(2)?,
            tags_json: row.get(3)?,
            content_hash: row.get(4)?,
            salience: row.get(5)?,
            access_count: row.get(6)?,
            created_at: row.get(7)?,
            last_accessed: row.get(8)?,
        })
    }

    fn into_entry(self, tier: Tier) -> MemoryResult<MemoryEntry> {
        let role = Role::from_str(&self.role)
            .ok_or_else(|| MemoryError::persistence(format!("invalid role: {}", self.role)))?;
        let timestamp = |value: &str| {
            parse_datetime(value).ok_or_else(|| MemoryError::persistence(format!("invalid timestamp: {}", value)))
        };

        Ok(MemoryEntry {
            id: parse_id(&self.id)?,
            text: self.text,
            role,
            tags: serde_json::from_str(&self.tags_json)?,
            content_hash: self.content_hash,
            created_at: timestamp(&self.created_at)?,
            tier,
            salience: self.salience,
            embedding: None,
            last_accessed: timestamp(&self.last_accessed)?,
            access_count: u32::try_from(self.access_count).unwrap_or(u32::MAX),
        })
    }
}

fn parse_id(value: &str) -> MemoryResult<EntryId> {
    EntryId::parse(value).ok_or_else(|| MemoryError::persistence(format!("invalid entry id: {}", value)))
}

/// Little-endian f32 sequence
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> MemoryResult<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(MemoryError::persistence(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_vector_encoding_is_exact() {
        let vector = vec![0.1f32, -3.5e-8, f32::MAX, 0.0, -0.0];
        let decoded = decode_vector(&encode_vector(&vector)).unwrap();
        assert_eq!(
            decoded.iter().map(|x| x.to_bits()).collect::<Vec<_>>(),
            vector.iter().map(|x| x.to_bits()).collect::<Vec<_>>()
        );
        assert!(decode_vector(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn test_empty_database_has_no_snapshot() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        assert!(store.load_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        let now = Utc::now();

        let mut first = Snapshot::empty(now);
        first.short_term.push(MemoryEntry::new("one", Role::User, vec![], 0.2, now));
        first.short_term.push(MemoryEntry::new("two", Role::Assistant, vec!["x".into()], 0.4, now));
        store.save_snapshot(&first).await.unwrap();
        assert_eq!(store.load_snapshot().await.unwrap().unwrap(), first);

        let second = Snapshot::empty(now);
        store.save_snapshot(&second).await.unwrap();
        assert_eq!(store.load_snapshot().await.unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn test_locked_database_fails_within_busy_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let store = SqliteSnapshotStore::open_with_busy_timeout(&path, Duration::from_millis(100)).unwrap();

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let started = std::time::Instant::now();
        let err = store.save_snapshot(&Snapshot::empty(Utc::now())).await.unwrap_err();
        assert!(err.is_persistence_failure());
        assert!(started.elapsed() < Duration::from_secs(2));

        holder.execute_batch("ROLLBACK;").unwrap();
        store.save_snapshot(&Snapshot::empty(Utc::now())).await.unwrap();
    }
}
