//! Database migrations for the SQLite memory store

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Memories with lifecycle columns (v1)
///
/// Timestamps are RFC 3339 with fixed nanosecond precision and a `Z` suffix,
/// so lexical order equals chronological order.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            last_accessed_at TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            importance INTEGER NOT NULL CHECK (importance BETWEEN 1 AND 5),
            stability INTEGER NOT NULL CHECK (stability BETWEEN 1 AND 5),
            lifecycle_state TEXT NOT NULL DEFAULT 'ACTIVE',
            decay_score REAL NOT NULL DEFAULT 0.0 CHECK (decay_score BETWEEN 0.0 AND 1.0),
            soft_deleted_at TEXT,
            CHECK ((lifecycle_state = 'SOFT_DELETED') = (soft_deleted_at IS NOT NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_memories_access ON memories(last_accessed_at, id);
        CREATE INDEX IF NOT EXISTS idx_memories_soft_deleted
            ON memories(lifecycle_state, soft_deleted_at);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

/// Maintenance checkpoint (v2): single-row resume cursor and last run outcome
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS maintenance_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            cursor_last_accessed_at TEXT,
            cursor_id TEXT,
            last_run_at TEXT,
            last_status TEXT
        );

        INSERT OR IGNORE INTO maintenance_state (id) VALUES (1);

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;
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

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_soft_delete_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO memories (id, created_at, last_accessed_at, importance, stability, lifecycle_state)
             VALUES ('m', '2024-01-01T00:00:00.000000000Z', '2024-01-01T00:00:00.000000000Z', 3, 3, 'SOFT_DELETED')",
            [],
        );
        assert!(result.is_err());
    }
}
