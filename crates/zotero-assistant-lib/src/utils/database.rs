// SQLite Database
// Shared handle to the local cache of threads, runs, actions and keys

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::schema;
use super::store::APP_IDENTIFIER;

#[cfg(debug_assertions)]
pub const DATABASE_FILE: &str = "assistant-dev.db";

#[cfg(not(debug_assertions))]
pub const DATABASE_FILE: &str = "assistant.db";

/// Cloneable handle; clones share one connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database file at `path`, creating it and its directory if needed
    pub fn open(path: &Path) -> Result<Self, String> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| format!("Failed to configure database: {}", e))?;

        log::debug!("Opened database at {}", path.display());
        Self::migrated(conn)
    }

    /// Private in-memory database
    pub fn new_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory()
            .map_err(|e| format!("Failed to open in-memory database: {}", e))?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, String> {
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| format!("Failed to enable foreign keys: {}", e))?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Connection) -> Result<T, String>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| "Database lock poisoned".to_string())?;
        f(&conn)
    }

    /// Run `f` inside a transaction; any error rolls it back
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Connection) -> Result<T, String>,
    {
        self.with_connection(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| format!("Failed to start transaction: {}", e))?;
            let value = f(&tx)?;
            tx.commit()
                .map_err(|e| format!("Failed to commit transaction: {}", e))?;
            Ok(value)
        })
    }
}

/// `<data dir>/<app>/assistant.db`
pub fn get_database_path() -> Result<PathBuf, String> {
    dirs::data_dir()
        .map(|p| p.join(APP_IDENTIFIER).join(DATABASE_FILE))
        .ok_or_else(|| "Could not determine application data directory".to_string())
}

pub fn open_default_database() -> Result<Database, String> {
    Database::open(&get_database_path()?)
}
