//! Database schema migrations.
//!
//! Applies the initial schema: sessions, turns and schema_migrations.

use rusqlite::Connection;
use tracing::info;

use tabula_core::error::TabulaError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), TabulaError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| TabulaError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| TabulaError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: session_memory");
    }

    Ok(())
}

/// Version 1: one row per session, append-only turns keyed by (session, idx).
fn apply_v1(conn: &Connection) -> Result<(), TabulaError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY NOT NULL,
            active_role     TEXT NOT NULL
                            CHECK (active_role IN ('coordinator', 'data_loader', 'analytics', 'communication')),
            dataset         TEXT,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS turns (
            session_id      TEXT NOT NULL,
            idx             INTEGER NOT NULL CHECK (idx >= 0),
            role            TEXT NOT NULL,
            user_text       TEXT NOT NULL,
            assistant_text  TEXT NOT NULL,
            invocations     TEXT NOT NULL DEFAULT '[]',
            handoff_from    TEXT,
            created_at      INTEGER NOT NULL,
            PRIMARY KEY (session_id, idx),
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_updated
            ON sessions (updated_at DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'session_memory');
        ",
    )
    .map_err(|e| TabulaError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_active_role_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO sessions (id, active_role, created_at, updated_at)
             VALUES ('s1', 'insight', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_turn_requires_session() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO turns (session_id, idx, role, user_text, assistant_text, created_at)
             VALUES ('missing', 0, 'coordinator', 'hi', 'hello', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_turn_index_unique_per_session() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO sessions (id, active_role, created_at, updated_at)
             VALUES ('s1', 'coordinator', 0, 0)",
            [],
        )
        .unwrap();
        let insert = "INSERT INTO turns (session_id, idx, role, user_text, assistant_text, created_at)
                      VALUES ('s1', 0, 'coordinator', 'hi', 'hello', 0)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_session_delete_cascades_to_turns() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO sessions (id, active_role, created_at, updated_at)
                VALUES ('s1', 'coordinator', 0, 0);
             INSERT INTO turns (session_id, idx, role, user_text, assistant_text, created_at)
                VALUES ('s1', 0, 'coordinator', 'hi', 'hello', 0);
             DELETE FROM sessions WHERE id = 's1';",
        )
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
