//! SQL schema definitions.

/// Initial schema.
pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS chunk (
    chunk_id BLOB PRIMARY KEY,
    artwork_hash BLOB NOT NULL,
    indexed INTEGER NOT NULL DEFAULT 0,
    confirmed INTEGER NOT NULL DEFAULT 0,
    stored INTEGER NOT NULL DEFAULT 0,
    fetch_attempts INTEGER NOT NULL DEFAULT 0,
    last_fetch_failure_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_chunk_artwork ON chunk(artwork_hash);
CREATE INDEX IF NOT EXISTS idx_chunk_indexed ON chunk(indexed);

CREATE TABLE IF NOT EXISTS masternode (
    identifier BLOB PRIMARY KEY,
    address TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS activation_ticket (
    txid TEXT PRIMARY KEY,
    height INTEGER NOT NULL
);
"#;
