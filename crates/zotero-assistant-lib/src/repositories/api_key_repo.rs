// API Key Repository
// Encrypted provider keys for bring-your-own-key models

use chrono::Utc;
use rusqlite::params;

use crate::services::crypto::EncryptedData;
use crate::utils::database::Database;

/// Repository for encrypted provider API keys
pub struct ApiKeyRepository {
    db: Database,
}

impl ApiKeyRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store or replace the key of a provider
    pub fn store_api_key(&self, provider: &str, encrypted: &EncryptedData) -> Result<(), String> {
        let now = Utc::now().to_rfc3339();

        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO api_keys (provider, ciphertext, nonce, created_at, updated_at)
                VALUES (?1, ?2, ?3, COALESCE((SELECT created_at FROM api_keys WHERE provider = ?1), ?4), ?4)
                "#,
                params![provider, encrypted.ciphertext, encrypted.nonce, now],
            )
            .map_err(|e| format!("Failed to store API key: {}", e))?;

            Ok(())
        })
    }

    pub fn get_api_key(&self, provider: &str) -> Result<Option<EncryptedData>, String> {
        self.db.with_connection(|conn| {
            let result = conn.query_row(
                "SELECT ciphertext, nonce FROM api_keys WHERE provider = ?1",
                params![provider],
                |row| {
                    Ok(EncryptedData {
                        ciphertext: row.get(0)?,
                        nonce: row.get(1)?,
                    })
                },
            );

            match result {
                Ok(data) => Ok(Some(data)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(format!("Failed to get API key: {}", e)),
            }
        })
    }

    pub fn delete_api_key(&self, provider: &str) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let rows = conn
                .execute("DELETE FROM api_keys WHERE provider = ?1", params![provider])
                .map_err(|e| format!("Failed to delete API key: {}", e))?;
            Ok(rows > 0)
        })
    }

    pub fn has_api_key(&self, provider: &str) -> Result<bool, String> {
        Ok(self.get_api_key(provider)?.is_some())
    }

    /// Providers that currently have a stored key
    pub fn list_providers_with_keys(&self) -> Result<Vec<String>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT provider FROM api_keys ORDER BY provider")
                .map_err(|e| format!("Failed to prepare statement: {}", e))?;

            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| format!("Failed to query API keys: {}", e))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("Failed to read row: {}", e))
        })
    }
}
