//! Forward-only migrations keyed on `PRAGMA user_version`.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current_version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version == 0 {
        tracing::info!("initializing database schema v{SCHEMA_VERSION}");
        conn.execute_batch(schema::SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        for version in (current_version + 1)..=SCHEMA_VERSION {
            tracing::info!("running migration to v{version}");
            run_migration(conn, version)?;
            conn.pragma_update(None, "user_version", version)?;
        }
    } else if current_version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

fn run_migration(_conn: &Connection, version: u32) -> Result<()> {
    Err(DbError::Migration(format!(
        "unknown migration version: {version}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent_migration() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("first run");
        run(&conn).expect("second run should be no-op");
    }

    #[test]
    fn test_newer_version_rejected() {
        let conn = Connection::open_in_memory().expect("open");
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("set version");
        assert!(matches!(run(&conn), Err(DbError::Migration(_))));
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("migrate");

        for table in ["chunk", "masternode", "activation_ticket"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("table check");
            assert_eq!(count, 1, "table '{table}' should exist");
        }
    }
}
