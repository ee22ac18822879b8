//! `chunk` table queries.

use mnstore_types::{ArtworkHash, ChunkId, ChunkRecord};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{DbError, Result};

const COLUMNS: &str = "chunk_id, artwork_hash, indexed, confirmed, stored,
                       fetch_attempts, last_fetch_failure_at";

/// Outcome of [`create_or_confirm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Confirmed,
    Unchanged,
}

struct RawChunk {
    chunk_id: Vec<u8>,
    artwork_hash: Vec<u8>,
    indexed: bool,
    confirmed: bool,
    stored: bool,
    fetch_attempts: i64,
    last_fetch_failure_at: Option<i64>,
}

impl RawChunk {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chunk_id: row.get(0)?,
            artwork_hash: row.get(1)?,
            indexed: row.get(2)?,
            confirmed: row.get(3)?,
            stored: row.get(4)?,
            fetch_attempts: row.get(5)?,
            last_fetch_failure_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<ChunkRecord> {
        Ok(ChunkRecord {
            chunk_id: ChunkId::from_slice(&self.chunk_id)
                .map_err(|e| DbError::CorruptRow(format!("chunk_id: {e}")))?,
            artwork_hash: ArtworkHash::from_slice(&self.artwork_hash)
                .map_err(|e| DbError::CorruptRow(format!("artwork_hash: {e}")))?,
            indexed: self.indexed,
            confirmed: self.confirmed,
            stored: self.stored,
            fetch_attempts: self.fetch_attempts as u32,
            last_fetch_failure_at: self.last_fetch_failure_at.map(|t| t as u64),
        })
    }
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    where_clause: &str,
    params: P,
) -> Result<Vec<ChunkRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM chunk {where_clause} ORDER BY chunk_id"
    ))?;
    let raw = stmt
        .query_map(params, RawChunk::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raw.into_iter().map(RawChunk::into_record).collect()
}

/// Create the record, or set `confirmed` on an existing unconfirmed one.
/// Confirmation is never revoked.
pub fn create_or_confirm(
    conn: &Connection,
    chunk_id: &ChunkId,
    artwork_hash: &ArtworkHash,
    confirmed: bool,
) -> Result<Upsert> {
    let existing: Option<bool> = conn
        .query_row(
            "SELECT confirmed FROM chunk WHERE chunk_id = ?1",
            [chunk_id.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO chunk (chunk_id, artwork_hash, confirmed) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    chunk_id.as_bytes().as_slice(),
                    artwork_hash.as_bytes().as_slice(),
                    confirmed,
                ],
            )?;
            Ok(Upsert::Created)
        }
        Some(false) if confirmed => {
            conn.execute(
                "UPDATE chunk SET confirmed = 1 WHERE chunk_id = ?1",
                [chunk_id.as_bytes().as_slice()],
            )?;
            Ok(Upsert::Confirmed)
        }
        Some(_) => Ok(Upsert::Unchanged),
    }
}

pub fn get(conn: &Connection, chunk_id: &ChunkId) -> Result<Option<ChunkRecord>> {
    let raw = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM chunk WHERE chunk_id = ?1"),
            [chunk_id.as_bytes().as_slice()],
            RawChunk::from_row,
        )
        .optional()?;
    raw.map(RawChunk::into_record).transpose()
}

pub fn list_all(conn: &Connection) -> Result<Vec<ChunkRecord>> {
    query_records(conn, "", [])
}

pub fn list_unindexed(conn: &Connection) -> Result<Vec<ChunkRecord>> {
    query_records(conn, "WHERE indexed = 0", [])
}

pub fn list_by_artwork(conn: &Connection, artwork_hash: &ArtworkHash) -> Result<Vec<ChunkRecord>> {
    query_records(
        conn,
        "WHERE artwork_hash = ?1",
        [artwork_hash.as_bytes().as_slice()],
    )
}

/// Mark a batch of chunks indexed in one transaction.
pub fn mark_indexed(conn: &Connection, chunk_ids: &[ChunkId]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare("UPDATE chunk SET indexed = 1 WHERE chunk_id = ?1")?;
        for id in chunk_ids {
            stmt.execute([id.as_bytes().as_slice()])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Mark a chunk durably stored and clear its failure history.
pub fn mark_stored(conn: &Connection, chunk_id: &ChunkId) -> Result<()> {
    let n = conn.execute(
        "UPDATE chunk SET stored = 1, fetch_attempts = 0, last_fetch_failure_at = NULL
         WHERE chunk_id = ?1",
        [chunk_id.as_bytes().as_slice()],
    )?;
    if n == 0 {
        return Err(DbError::NotFound(chunk_id.to_hex()));
    }
    Ok(())
}

/// Clear `stored` after the persistent copy was lost or found corrupt, so
/// the chunk is scheduled for fetching again.
pub fn mark_missing(conn: &Connection, chunk_id: &ChunkId) -> Result<()> {
    conn.execute(
        "UPDATE chunk SET stored = 0 WHERE chunk_id = ?1",
        [chunk_id.as_bytes().as_slice()],
    )?;
    Ok(())
}

/// Record a round in which no owner served the chunk.
pub fn record_fetch_failure(conn: &Connection, chunk_id: &ChunkId, now: u64) -> Result<u32> {
    let attempts: Option<i64> = conn
        .query_row(
            "UPDATE chunk SET fetch_attempts = fetch_attempts + 1, last_fetch_failure_at = ?1
             WHERE chunk_id = ?2
             RETURNING fetch_attempts",
            rusqlite::params![now as i64, chunk_id.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    attempts
        .map(|a| a as u32)
        .ok_or_else(|| DbError::NotFound(chunk_id.to_hex()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn art() -> ArtworkHash {
        ArtworkHash::of(b"artwork")
    }

    #[test]
    fn test_create_then_confirm() {
        let conn = test_db();
        let id = ChunkId::of(b"c1");
        assert_eq!(
            create_or_confirm(&conn, &id, &art(), false).expect("create"),
            Upsert::Created
        );
        assert_eq!(
            create_or_confirm(&conn, &id, &art(), false).expect("again"),
            Upsert::Unchanged
        );
        assert_eq!(
            create_or_confirm(&conn, &id, &art(), true).expect("confirm"),
            Upsert::Confirmed
        );
        assert_eq!(
            create_or_confirm(&conn, &id, &art(), false).expect("no downgrade"),
            Upsert::Unchanged
        );
        let rec = get(&conn, &id).expect("get").expect("exists");
        assert!(rec.confirmed);
        assert_eq!(rec.artwork_hash, art());
    }

    #[test]
    fn test_get_missing() {
        let conn = test_db();
        assert!(get(&conn, &ChunkId::of(b"nope")).expect("get").is_none());
    }

    #[test]
    fn test_mark_indexed_and_list_unindexed() {
        let conn = test_db();
        let ids: Vec<ChunkId> = (0..4u8).map(|i| ChunkId::of(&[i])).collect();
        for id in &ids {
            create_or_confirm(&conn, id, &art(), true).expect("create");
        }
        assert_eq!(list_unindexed(&conn).expect("list").len(), 4);
        mark_indexed(&conn, &ids[..3]).expect("mark");
        let left = list_unindexed(&conn).expect("list");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].chunk_id, ids[3]);
        assert_eq!(list_all(&conn).expect("all").len(), 4);
    }

    #[test]
    fn test_fetch_failure_then_stored() {
        let conn = test_db();
        let id = ChunkId::of(b"f");
        create_or_confirm(&conn, &id, &art(), true).expect("create");
        assert_eq!(record_fetch_failure(&conn, &id, 100).expect("fail 1"), 1);
        assert_eq!(record_fetch_failure(&conn, &id, 200).expect("fail 2"), 2);
        let rec = get(&conn, &id).expect("get").expect("exists");
        assert_eq!(rec.fetch_attempts, 2);
        assert_eq!(rec.last_fetch_failure_at, Some(200));

        mark_stored(&conn, &id).expect("stored");
        let rec = get(&conn, &id).expect("get").expect("exists");
        assert!(rec.stored);
        assert_eq!(rec.fetch_attempts, 0);
        assert_eq!(rec.last_fetch_failure_at, None);
    }

    #[test]
    fn test_mark_missing_clears_stored() {
        let conn = test_db();
        let id = ChunkId::of(b"m");
        create_or_confirm(&conn, &id, &art(), true).expect("create");
        mark_stored(&conn, &id).expect("stored");
        mark_missing(&conn, &id).expect("missing");
        let rec = get(&conn, &id).expect("get").expect("exists");
        assert!(!rec.stored);
        assert!(rec.confirmed);
    }

    #[test]
    fn test_unknown_chunk_updates_fail() {
        let conn = test_db();
        let id = ChunkId::of(b"ghost");
        assert!(matches!(mark_stored(&conn, &id), Err(DbError::NotFound(_))));
        assert!(matches!(
            record_fetch_failure(&conn, &id, 1),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_by_artwork() {
        let conn = test_db();
        let other = ArtworkHash::of(b"other");
        create_or_confirm(&conn, &ChunkId::of(b"1"), &art(), true).expect("a");
        create_or_confirm(&conn, &ChunkId::of(b"2"), &art(), true).expect("b");
        create_or_confirm(&conn, &ChunkId::of(b"3"), &other, true).expect("c");
        assert_eq!(list_by_artwork(&conn, &art()).expect("list").len(), 2);
        assert_eq!(list_by_artwork(&conn, &other).expect("list").len(), 1);
    }
}
