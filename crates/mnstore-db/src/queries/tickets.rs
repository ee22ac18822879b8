//! `activation_ticket` table queries.

use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// Remember that a ticket's chunks were applied.
pub fn record_processed(conn: &Connection, txid: &str, height: u64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO activation_ticket (txid, height) VALUES (?1, ?2)",
        rusqlite::params![txid, height as i64],
    )?;
    Ok(())
}

pub fn is_processed(conn: &Connection, txid: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM activation_ticket WHERE txid = ?1",
            [txid],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Highest block height among processed tickets.
pub fn max_height(conn: &Connection) -> Result<Option<u64>> {
    let height: Option<i64> =
        conn.query_row("SELECT MAX(height) FROM activation_ticket", [], |row| {
            row.get(0)
        })?;
    Ok(height.map(|h| h as u64))
}
