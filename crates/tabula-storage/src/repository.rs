//! SQLite-backed session repository.
//!
//! Operates on the Database struct using raw SQL. Each session is one row in
//! `sessions`; its turns live in `turns`, ordered by `idx`.

use std::str::FromStr;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use uuid::Uuid;

use tabula_core::error::TabulaError;
use tabula_core::types::{
    DatasetRef, RoleName, Session, SessionId, SessionSummary, Timestamp, ToolInvocation, Turn,
};

use crate::db::Database;

/// Repository for sessions and their turn logs.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session row. Existing turns on the value are ignored.
    pub fn create(&self, session: &Session) -> Result<(), TabulaError> {
        let dataset = encode_dataset(session.dataset.as_ref())?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, active_role, dataset, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    session.id.to_string(),
                    session.active_role.to_string(),
                    dataset,
                    session.created_at.0,
                    session.updated_at.0,
                ],
            )
            .map_err(|e| TabulaError::Storage(format!("Failed to create session: {}", e)))?;
            Ok(())
        })
    }

    /// Load a full session snapshot, turns in index order.
    pub fn find(&self, id: SessionId) -> Result<Option<Session>, TabulaError> {
        self.db.with_conn(|conn| {
            let header = conn
                .query_row(
                    "SELECT active_role, dataset, created_at, updated_at
                     FROM sessions WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| TabulaError::Storage(e.to_string()))?;

            let Some((role, dataset, created_at, updated_at)) = header else {
                return Ok(None);
            };

            let mut stmt = conn
                .prepare(
                    "SELECT idx, role, user_text, assistant_text, invocations, handoff_from, created_at
                     FROM turns WHERE session_id = ?1
                     ORDER BY idx ASC",
                )
                .map_err(|e| TabulaError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_turn(row))
                })
                .map_err(|e| TabulaError::Storage(e.to_string()))?;

            let mut turns = Vec::new();
            for row in rows {
                let turn = row.map_err(|e| TabulaError::Storage(e.to_string()))??;
                turns.push(turn);
            }

            Ok(Some(Session {
                id,
                active_role: parse_role(&role)?,
                dataset: decode_dataset(dataset.as_deref())?,
                turns,
                created_at: Timestamp(created_at),
                updated_at: Timestamp(updated_at),
            }))
        })
    }

    /// Append one turn and move the session's active role to the turn's role.
    ///
    /// Both writes commit together or not at all. The turn's index must be
    /// exactly one past the last stored index, unless an identical turn is
    /// already stored at that index, in which case the append is a no-op.
    pub fn append_turn(&self, id: SessionId, turn: &Turn) -> Result<(), TabulaError> {
        let invocations = serde_json::to_string(&turn.tool_invocations)?;
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| TabulaError::Storage(format!("Failed to begin transaction: {}", e)))?;

            let next_index: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(idx) + 1, 0) FROM turns WHERE session_id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| TabulaError::Storage(e.to_string()))?;

            let index = turn.index as i64;
            if index < next_index && stored_turn_matches(&tx, id, turn, &invocations)? {
                // An earlier attempt committed after its caller gave up on it.
                return Ok(());
            }
            if index != next_index {
                return Err(TabulaError::TurnConflict {
                    session: id,
                    expected: next_index,
                    got: index,
                });
            }

            let updated = tx
                .execute(
                    "UPDATE sessions SET active_role = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id.to_string(), turn.role.to_string(), turn.created_at.0],
                )
                .map_err(|e| TabulaError::Storage(format!("Failed to update session: {}", e)))?;
            if updated == 0 {
                return Err(TabulaError::SessionNotFound(id));
            }

            tx.execute(
                "INSERT INTO turns (session_id, idx, role, user_text, assistant_text, invocations, handoff_from, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id.to_string(),
                    turn.index as i64,
                    turn.role.to_string(),
                    turn.user_text,
                    turn.assistant_text,
                    invocations,
                    turn.handoff_from.map(|r| r.to_string()),
                    turn.created_at.0,
                ],
            )
            .map_err(|e| TabulaError::Storage(format!("Failed to append turn: {}", e)))?;

            tx.commit()
                .map_err(|e| TabulaError::Storage(format!("Failed to commit turn: {}", e)))?;
            Ok(())
        })
    }

    /// Replace the session's dataset reference wholesale.
    pub fn set_dataset(&self, id: SessionId, dataset: &DatasetRef) -> Result<(), TabulaError> {
        let encoded = encode_dataset(Some(dataset))?;
        self.db.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions SET dataset = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id.to_string(), encoded, Timestamp::now().0],
                )
                .map_err(|e| TabulaError::Storage(format!("Failed to set dataset: {}", e)))?;
            if updated == 0 {
                return Err(TabulaError::SessionNotFound(id));
            }
            Ok(())
        })
    }

    /// Delete a session and its turns. Returns whether a row was removed.
    pub fn delete(&self, id: SessionId) -> Result<bool, TabulaError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM sessions WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| TabulaError::Storage(format!("Failed to delete session: {}", e)))?;
            Ok(removed > 0)
        })
    }

    /// Summaries of all sessions, most recently updated first.
    pub fn list(&self) -> Result<Vec<SessionSummary>, TabulaError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT s.id, s.active_role, s.dataset, s.updated_at,
                            (SELECT COUNT(*) FROM turns t WHERE t.session_id = s.id)
                     FROM sessions s
                     ORDER BY s.updated_at DESC",
                )
                .map_err(|e| TabulaError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .map_err(|e| TabulaError::Storage(e.to_string()))?;

            let mut summaries = Vec::new();
            for row in rows {
                let (id, role, dataset, updated_at, turn_count) =
                    row.map_err(|e| TabulaError::Storage(e.to_string()))?;
                summaries.push(SessionSummary {
                    id: parse_uuid(&id)?,
                    active_role: parse_role(&role)?,
                    dataset_path: decode_dataset(dataset.as_deref())?.map(|d| d.path),
                    turn_count: turn_count as u64,
                    updated_at: Timestamp(updated_at),
                });
            }
            Ok(summaries)
        })
    }
}

// =============================================================================
// Row mapping helpers
// =============================================================================

/// Whether the row at `turn.index` holds exactly this turn.
fn stored_turn_matches(
    conn: &rusqlite::Connection,
    id: SessionId,
    turn: &Turn,
    invocations: &str,
) -> Result<bool, TabulaError> {
    let stored = conn
        .query_row(
            "SELECT role, user_text, assistant_text, invocations, handoff_from, created_at
             FROM turns WHERE session_id = ?1 AND idx = ?2",
            rusqlite::params![id.to_string(), turn.index as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()
        .map_err(|e| TabulaError::Storage(e.to_string()))?;

    Ok(stored.is_some_and(|(role, user, assistant, invs, handoff, created)| {
        role == turn.role.to_string()
            && user == turn.user_text
            && assistant == turn.assistant_text
            && invs == invocations
            && handoff == turn.handoff_from.map(|r| r.to_string())
            && created == turn.created_at.0
    }))
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> Result<Turn, TabulaError> {
    let index: i64 = row.get(0).map_err(|e| TabulaError::Storage(e.to_string()))?;
    let role: String = row.get(1).map_err(|e| TabulaError::Storage(e.to_string()))?;
    let user_text: String = row.get(2).map_err(|e| TabulaError::Storage(e.to_string()))?;
    let assistant_text: String = row.get(3).map_err(|e| TabulaError::Storage(e.to_string()))?;
    let invocations: String = row.get(4).map_err(|e| TabulaError::Storage(e.to_string()))?;
    let handoff_from: Option<String> =
        row.get(5).map_err(|e| TabulaError::Storage(e.to_string()))?;
    let created_at: i64 = row.get(6).map_err(|e| TabulaError::Storage(e.to_string()))?;

    let tool_invocations: Vec<ToolInvocation> = serde_json::from_str(&invocations)?;

    Ok(Turn {
        index: index as u64,
        role: parse_role(&role)?,
        user_text,
        assistant_text,
        tool_invocations,
        handoff_from: handoff_from.as_deref().map(parse_role).transpose()?,
        created_at: Timestamp(created_at),
    })
}

fn parse_role(s: &str) -> Result<RoleName, TabulaError> {
    RoleName::from_str(s).map_err(|_| TabulaError::UnknownRole(s.to_string()))
}

fn parse_uuid(s: &str) -> Result<Uuid, TabulaError> {
    Uuid::parse_str(s).map_err(|e| TabulaError::Storage(format!("Invalid session id: {}", e)))
}

fn encode_dataset(dataset: Option<&DatasetRef>) -> Result<Option<String>, TabulaError> {
    dataset
        .map(serde_json::to_string)
        .transpose()
        .map_err(TabulaError::from)
}

fn decode_dataset(raw: Option<&str>) -> Result<Option<DatasetRef>, TabulaError> {
    raw.map(serde_json::from_str)
        .transpose()
        .map_err(TabulaError::from)
}
