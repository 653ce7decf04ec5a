// SQLite Schema Definitions and Migrations
// Thread history cache and encrypted provider keys

use rusqlite::Connection;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

struct Migration {
    version: i32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        up: r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Finalized runs, in conversation order
            CREATE TABLE IF NOT EXISTS agent_runs (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                sequence INTEGER NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('in_progress', 'thinking', 'completed', 'error', 'canceled')),
                run_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_agent_runs_thread ON agent_runs(thread_id, sequence);

            CREATE TABLE IF NOT EXISTS proposed_actions (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                run_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('pending', 'applied', 'rejected', 'undone', 'error')),
                action_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_proposed_actions_run ON proposed_actions(run_id);
            CREATE INDEX IF NOT EXISTS idx_proposed_actions_thread ON proposed_actions(thread_id);

            CREATE TABLE IF NOT EXISTS citations (
                run_id TEXT NOT NULL,
                citation_id TEXT NOT NULL,
                thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                citation_json TEXT NOT NULL,
                PRIMARY KEY (run_id, citation_id)
            );
            CREATE INDEX IF NOT EXISTS idx_citations_thread ON citations(thread_id);
        "#,
    },
    Migration {
        version: 2,
        description: "Encrypted provider API keys",
        up: r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                provider TEXT PRIMARY KEY,
                ciphertext TEXT NOT NULL,
                nonce TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
];

/// Apply every migration newer than the stored `user_version`, each in its own transaction
pub fn run_migrations(conn: &Connection) -> Result<(), String> {
    let applied = get_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        log::info!("Applying schema v{} ({})", migration.version, migration.description);

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| format!("Failed to begin migration v{}: {}", migration.version, e))?;
        tx.execute_batch(migration.up)
            .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;
        tx.pragma_update(None, "user_version", migration.version)
            .map_err(|e| format!("Failed to record schema v{}: {}", migration.version, e))?;
        tx.commit()
            .map_err(|e| format!("Failed to commit migration v{}: {}", migration.version, e))?;
    }

    Ok(())
}

pub fn get_version(conn: &Connection) -> Result<i32, String> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| format!("Failed to read schema version: {}", e))
}
