//! # mnstore-db
//!
//! Durable chunk, masternode and ticket records.
//!
//! - WAL mode, foreign keys enforced
//! - Identifiers stored as raw BLOBs, timestamps as Unix seconds
//! - Schema version stored in `PRAGMA user_version`
//!
//! Distances and ranks are derived data and are never stored here; the
//! node rebuilds its ownership index from these tables at startup.

pub mod migrations;
pub mod queries;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value does not decode to its domain type.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the database at `path` and run pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_open_file_uses_wal() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let conn = open(&dir.path().join("mnstore.db")).expect("open");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_reopen_keeps_data() {
        use mnstore_types::{ArtworkHash, ChunkId};
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("mnstore.db");
        let id = ChunkId::of(b"persist");
        {
            let conn = open(&path).expect("open");
            queries::chunks::create_or_confirm(&conn, &id, &ArtworkHash::of(b"a"), true)
                .expect("insert");
        }
        let conn = open(&path).expect("reopen");
        assert!(queries::chunks::get(&conn, &id).expect("get").is_some());
    }
}
