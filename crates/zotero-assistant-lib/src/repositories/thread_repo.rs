// Thread Repository
// Local cache of finalized runs, proposed actions and citations per thread

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::action::ProposedAction;
use crate::models::citation::CitationMetadata;
use crate::models::run::AgentRun;
use crate::utils::database::Database;

/// Stored thread header
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadRecord {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to rebuild a thread
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub thread: ThreadRecord,
    pub runs: Vec<AgentRun>,
    pub actions: Vec<ProposedAction>,
    pub citations: Vec<CitationMetadata>,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid timestamp '{}': {}", value, e))
}

fn touch_thread(conn: &Connection, thread_id: &str) -> Result<(), String> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        r#"
        INSERT INTO threads (id, title, created_at, updated_at) VALUES (?1, NULL, ?2, ?2)
        ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
        "#,
        params![thread_id, now],
    )
    .map_err(|e| format!("Failed to touch thread: {}", e))?;
    Ok(())
}

/// Repository for thread history
pub struct ThreadRepository {
    db: Database,
}

impl ThreadRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // =========================================================================
    // Threads
    // =========================================================================

    /// Create the thread or update its title
    pub fn upsert_thread(&self, thread_id: &str, title: Option<&str>) -> Result<(), String> {
        self.db.with_connection(|conn| {
            touch_thread(conn, thread_id)?;
            if let Some(title) = title {
                conn.execute(
                    "UPDATE threads SET title = ?2 WHERE id = ?1",
                    params![thread_id, title],
                )
                .map_err(|e| format!("Failed to update thread title: {}", e))?;
            }
            Ok(())
        })
    }

    pub fn get_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>, String> {
        self.db.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, title, created_at, updated_at FROM threads WHERE id = ?1",
                    params![thread_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| format!("Failed to get thread: {}", e))?;

            match row {
                Some((id, title, created_at, updated_at)) => Ok(Some(ThreadRecord {
                    id,
                    title,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                })),
                None => Ok(None),
            }
        })
    }

    /// Most recently updated threads first
    pub fn list_threads(&self, limit: i64) -> Result<Vec<ThreadRecord>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, created_at, updated_at FROM threads ORDER BY updated_at DESC LIMIT ?1",
                )
                .map_err(|e| format!("Failed to prepare statement: {}", e))?;

            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(|e| format!("Failed to list threads: {}", e))?;

            let mut threads = Vec::new();
            for row in rows {
                let (id, title, created_at, updated_at) =
                    row.map_err(|e| format!("Failed to read row: {}", e))?;
                threads.push(ThreadRecord {
                    id,
                    title,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                });
            }
            Ok(threads)
        })
    }

    /// Delete a thread with all its runs, actions and citations
    pub fn delete_thread(&self, thread_id: &str) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let rows = conn
                .execute("DELETE FROM threads WHERE id = ?1", params![thread_id])
                .map_err(|e| format!("Failed to delete thread: {}", e))?;
            Ok(rows > 0)
        })
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Insert or update a run; new runs go to the end of the thread
    pub fn save_run(&self, thread_id: &str, run: &AgentRun) -> Result<(), String> {
        let run_json =
            serde_json::to_string(run).map_err(|e| format!("Failed to serialize run: {}", e))?;

        self.db.with_transaction(|conn| {
            touch_thread(conn, thread_id)?;
            conn.execute(
                r#"
                INSERT INTO agent_runs (id, thread_id, sequence, status, run_json, created_at, completed_at)
                VALUES (
                    ?1, ?2,
                    (SELECT COALESCE(MAX(sequence), 0) + 1 FROM agent_runs WHERE thread_id = ?2),
                    ?3, ?4, ?5, ?6
                )
                ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    run_json = excluded.run_json,
                    completed_at = excluded.completed_at
                "#,
                params![
                    run.id,
                    thread_id,
                    run.status.to_string(),
                    run_json,
                    run.created_at.to_rfc3339(),
                    run.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| format!("Failed to save run: {}", e))?;
            Ok(())
        })
    }

    /// Runs of a thread in conversation order
    pub fn list_runs(&self, thread_id: &str) -> Result<Vec<AgentRun>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT run_json FROM agent_runs WHERE thread_id = ?1 ORDER BY sequence ASC")
                .map_err(|e| format!("Failed to prepare statement: {}", e))?;

            let rows = stmt
                .query_map(params![thread_id], |row| row.get::<_, String>(0))
                .map_err(|e| format!("Failed to list runs: {}", e))?;

            let mut runs = Vec::new();
            for row in rows {
                let json = row.map_err(|e| format!("Failed to read row: {}", e))?;
                let run: AgentRun =
                    serde_json::from_str(&json).map_err(|e| format!("Failed to parse run: {}", e))?;
                runs.push(run);
            }
            Ok(runs)
        })
    }

    /// Delete runs with their actions and citations
    pub fn delete_runs(&self, run_ids: &[String]) -> Result<usize, String> {
        self.db.with_transaction(|conn| {
            let mut deleted = 0;
            for run_id in run_ids {
                conn.execute("DELETE FROM proposed_actions WHERE run_id = ?1", params![run_id])
                    .map_err(|e| format!("Failed to delete actions: {}", e))?;
                conn.execute("DELETE FROM citations WHERE run_id = ?1", params![run_id])
                    .map_err(|e| format!("Failed to delete citations: {}", e))?;
                deleted += conn
                    .execute("DELETE FROM agent_runs WHERE id = ?1", params![run_id])
                    .map_err(|e| format!("Failed to delete run: {}", e))?;
            }
            Ok(deleted)
        })
    }

    // =========================================================================
    // Proposed Actions
    // =========================================================================

    /// Upsert the given actions
    pub fn save_actions(&self, thread_id: &str, actions: &[ProposedAction]) -> Result<(), String> {
        self.db.with_transaction(|conn| {
            touch_thread(conn, thread_id)?;
            for action in actions {
                let json = serde_json::to_string(action)
                    .map_err(|e| format!("Failed to serialize action: {}", e))?;
                conn.execute(
                    r#"
                    INSERT INTO proposed_actions (id, thread_id, run_id, action_type, status, action_json, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(id) DO UPDATE SET
                        status = excluded.status,
                        action_json = excluded.action_json,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        action.id,
                        thread_id,
                        action.run_id,
                        action.action_type.to_string(),
                        action.status().to_string(),
                        json,
                        action.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| format!("Failed to save action {}: {}", action.id, e))?;
            }
            Ok(())
        })
    }

    pub fn list_actions(&self, thread_id: &str) -> Result<Vec<ProposedAction>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT a.action_json FROM proposed_actions a
                    LEFT JOIN agent_runs r ON r.id = a.run_id
                    WHERE a.thread_id = ?1
                    ORDER BY r.sequence ASC, a.rowid ASC
                    "#,
                )
                .map_err(|e| format!("Failed to prepare statement: {}", e))?;

            let rows = stmt
                .query_map(params![thread_id], |row| row.get::<_, String>(0))
                .map_err(|e| format!("Failed to list actions: {}", e))?;

            let mut actions = Vec::new();
            for row in rows {
                let json = row.map_err(|e| format!("Failed to read row: {}", e))?;
                actions.push(
                    serde_json::from_str(&json).map_err(|e| format!("Failed to parse action: {}", e))?,
                );
            }
            Ok(actions)
        })
    }

    // =========================================================================
    // Citations
    // =========================================================================

    /// Append citations; already stored (run_id, citation_id) pairs are kept
    pub fn save_citations(&self, thread_id: &str, citations: &[CitationMetadata]) -> Result<usize, String> {
        self.db.with_transaction(|conn| {
            touch_thread(conn, thread_id)?;
            let mut inserted = 0;
            for citation in citations {
                let Some(run_id) = citation.run_id.as_deref() else {
                    continue;
                };
                let json = serde_json::to_string(citation)
                    .map_err(|e| format!("Failed to serialize citation: {}", e))?;
                inserted += conn
                    .execute(
                        r#"
                        INSERT OR IGNORE INTO citations (run_id, citation_id, thread_id, position, citation_json)
                        VALUES (?1, ?2, ?3, (SELECT COUNT(*) FROM citations WHERE thread_id = ?3), ?4)
                        "#,
                        params![run_id, citation.citation_id, thread_id, json],
                    )
                    .map_err(|e| format!("Failed to save citation: {}", e))?;
            }
            Ok(inserted)
        })
    }

    pub fn list_citations(&self, thread_id: &str) -> Result<Vec<CitationMetadata>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT citation_json FROM citations WHERE thread_id = ?1 ORDER BY position ASC")
                .map_err(|e| format!("Failed to prepare statement: {}", e))?;

            let rows = stmt
                .query_map(params![thread_id], |row| row.get::<_, String>(0))
                .map_err(|e| format!("Failed to list citations: {}", e))?;

            let mut citations = Vec::new();
            for row in rows {
                let json = row.map_err(|e| format!("Failed to read row: {}", e))?;
                citations.push(
                    serde_json::from_str(&json).map_err(|e| format!("Failed to parse citation: {}", e))?,
                );
            }
            Ok(citations)
        })
    }

    /// Load a complete thread, `None` if it was never stored
    pub fn load_thread(&self, thread_id: &str) -> Result<Option<ThreadSnapshot>, String> {
        let Some(thread) = self.get_thread(thread_id)? else {
            return Ok(None);
        };

        Ok(Some(ThreadSnapshot {
            thread,
            runs: self.list_runs(thread_id)?,
            actions: self.list_actions(thread_id)?,
            citations: self.list_citations(thread_id)?,
        }))
    }
}
