//! Snapshot database migrations
//!
//! SQL migrations are embedded as strings and applied in order, tracked
//! through `PRAGMA user_version`.

use rusqlite::Connection;

use crate::{MemoryError, MemoryResult};

/// Snapshot tables SQL (001)
pub const SNAPSHOT_TABLES_SQL: &str = include_str!("001_snapshot_tables.sql");

const MIGRATIONS: &[&str] = &[SNAPSHOT_TABLES_SQL];

/// Schema version after all migrations
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Current `user_version` of the database
pub fn schema_version(conn: &Connection) -> MemoryResult<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> MemoryResult<()> {
    let current = schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(MemoryError::persistence(format!(
            "database schema version {} is newer than supported version {}",
            current, SCHEMA_VERSION
        )));
    }

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = idx as i64 + 1;
        conn.execute_batch(&format!(
            "BEGIN;\n{}\nPRAGMA user_version = {};\nCOMMIT;",
            sql, version
        ))?;
        tracing::debug!(version, "applied snapshot migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        assert!(run_migrations(&conn).unwrap_err().is_persistence_failure());
    }
}
