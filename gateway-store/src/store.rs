//! SQLite-backed credential store: providers, accounts, config, logs.
//!
//! Four top-level collections live in one on-disk file. Credentials are
//! encrypted field-by-field before persistence; decryption happens on demand
//! inside [`Store::get_account`] / [`Store::list_accounts_for_provider`].
//! Initialisation is lazy (first [`Store::open`] call creates the schema);
//! all writes are serialized through the single connection mutex; readers
//! work from their own snapshot query rather than holding the lock.

use crate::cipher::Cipher;
use gateway_types::{Account, AccountStatus, AppConfig, Credential, LogEntry, Provider};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("credential cipher: {0}")]
    Cipher(#[from] crate::cipher::CipherError),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Encrypted persistent KV store for the gateway's provider catalog, account
/// inventory, singleton config, and request/diagnostic logs.
pub struct Store {
    db: Arc<Mutex<rusqlite::Connection>>,
    cipher: Cipher,
}

impl Store {
    /// Opens or creates the database and tables at `path`. The credential
    /// cipher's fallback key (used only when the OS keyring is unavailable)
    /// is colocated at `path` + `.key`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&path)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                data TEXT NOT NULL,
                credentials TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_provider ON accounts(provider_id);
            CREATE TABLE IF NOT EXISTS app_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS logs (
                id TEXT PRIMARY KEY,
                timestamp_ms INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp_ms);
            "#,
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        let key_path = {
            let mut p = path.clone();
            let name = format!(
                "{}.key",
                p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
            );
            p.set_file_name(name);
            p
        };
        let cipher = Cipher::open(&key_path)?;
        if cipher.backend() == crate::cipher::KeyBackend::PlaintextFallback {
            tracing::warn!(
                "OS keyring unavailable; credential encryption key falls back to {}",
                key_path.display()
            );
        }

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            cipher,
        })
    }

    // ---- providers ----------------------------------------------------

    /// Force-updates built-in provider rows from `builtins` (endpoint,
    /// headers, model list, mapping, description), preserving any existing
    /// `enabled` flag and leaving custom providers untouched.
    pub async fn reconcile_builtin_providers(&self, builtins: Vec<Provider>) -> Result<(), StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            for mut provider in builtins {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT data FROM providers WHERE id = ?1",
                        rusqlite::params![&provider.id],
                        |row| row.get(0),
                    )
                    .ok();
                if let Some(existing) = existing {
                    let existing: Provider = serde_json::from_str(&existing)?;
                    if existing.kind == gateway_types::ProviderKind::Custom {
                        continue;
                    }
                    provider.enabled = existing.enabled;
                }
                let data = serde_json::to_string(&provider)?;
                conn.execute(
                    "INSERT INTO providers (id, data) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                    rusqlite::params![&provider.id, &data],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            }
            Ok(())
        })
    }

    pub async fn upsert_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        let db = self.db.clone();
        let data = serde_json::to_string(provider)?;
        let id = provider.id.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO providers (id, data) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                rusqlite::params![&id, &data],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    pub async fn get_provider(&self, id: &str) -> Result<Option<Provider>, StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM providers WHERE id = ?1",
                    rusqlite::params![&id],
                    |row| row.get(0),
                )
                .ok();
            data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
                .transpose()
        })
    }

    pub async fn list_providers(&self) -> Result<Vec<Provider>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn
                .prepare("SELECT data FROM providers ORDER BY id ASC")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                let data = row.map_err(|e| StoreError::Storage(e.to_string()))?;
                out.push(serde_json::from_str(&data)?);
            }
            Ok(out)
        })
    }

    /// Deletes a provider and cascades to its accounts.
    pub async fn delete_provider(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "DELETE FROM accounts WHERE provider_id = ?1",
                rusqlite::params![&id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            conn.execute("DELETE FROM providers WHERE id = ?1", rusqlite::params![&id])
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    // ---- accounts -------------------------------------------------------

    fn encrypt_credentials(&self, creds: &Credential) -> Result<String, StoreError> {
        let mut encrypted = std::collections::HashMap::new();
        for (k, v) in creds.0.iter() {
            encrypted.insert(k.clone(), self.cipher.encrypt(v)?);
        }
        Ok(serde_json::to_string(&encrypted)?)
    }

    fn decrypt_credentials(&self, blob: &str) -> Result<Credential, StoreError> {
        let encrypted: std::collections::HashMap<String, String> = serde_json::from_str(blob)?;
        let mut creds = Credential::new();
        for (k, v) in encrypted.iter() {
            creds.set(k.clone(), self.cipher.decrypt(v)?);
        }
        Ok(creds)
    }

    pub async fn upsert_account(&self, account: &Account) -> Result<(), StoreError> {
        let encrypted_creds = self.encrypt_credentials(&account.credentials)?;
        let mut stored = account.clone();
        stored.credentials = Credential::new(); // credentials live only in the `credentials` column
        let data = serde_json::to_string(&stored)?;
        let db = self.db.clone();
        let id = account.id.clone();
        let provider_id = account.provider_id.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO accounts (id, provider_id, data, credentials) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET provider_id = excluded.provider_id, data = excluded.data, credentials = excluded.credentials",
                rusqlite::params![&id, &provider_id, &data, &encrypted_creds],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    fn row_to_account(&self, data: &str, credentials: &str) -> Result<Account, StoreError> {
        let mut account: Account = serde_json::from_str(data)?;
        account.credentials = self.decrypt_credentials(credentials)?;
        Ok(account)
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        let row: Option<(String, String)> = tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT data, credentials FROM accounts WHERE id = ?1",
                rusqlite::params![&id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok()
        });
        row.map(|(data, creds)| self.row_to_account(&data, &creds))
            .transpose()
    }

    pub async fn list_accounts_for_provider(&self, provider_id: &str) -> Result<Vec<Account>, StoreError> {
        let db = self.db.clone();
        let provider_id = provider_id.to_string();
        let rows: Vec<(String, String)> = tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn
                .prepare("SELECT data, credentials FROM accounts WHERE provider_id = ?1 ORDER BY id ASC")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let out = stmt
                .query_map(rusqlite::params![&provider_id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .map_err(|e| StoreError::Storage(e.to_string()))?
                .filter_map(|r| r.ok())
                .collect();
            Ok::<_, StoreError>(out)
        })?;
        rows.iter()
            .map(|(data, creds)| self.row_to_account(data, creds))
            .collect()
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let db = self.db.clone();
        let rows: Vec<(String, String)> = tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn
                .prepare("SELECT data, credentials FROM accounts ORDER BY id ASC")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let out = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| StoreError::Storage(e.to_string()))?
                .filter_map(|r| r.ok())
                .collect();
            Ok::<_, StoreError>(out)
        })?;
        rows.iter()
            .map(|(data, creds)| self.row_to_account(data, creds))
            .collect()
    }

    pub async fn delete_account(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute("DELETE FROM accounts WHERE id = ?1", rusqlite::params![&id])
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    pub async fn set_account_status(&self, id: &str, status: AccountStatus) -> Result<(), StoreError> {
        let mut account = self
            .get_account(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        account.status = status;
        self.upsert_account(&account).await
    }

    /// Post-dispatch bookkeeping: atomically bumps `request_count`,
    /// `today_used`, and `last_used_ms`.
    pub async fn record_dispatch(&self, id: &str, now_ms: i64) -> Result<(), StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        let row: Option<(String, String)> = tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT data, credentials FROM accounts WHERE id = ?1",
                rusqlite::params![&id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok()
        });
        let Some((data, creds)) = row else {
            return Err(StoreError::NotFound(id));
        };
        let mut account = self.row_to_account(&data, &creds)?;
        account.request_count += 1;
        account.today_used += 1;
        account.last_used_ms = Some(now_ms);
        self.upsert_account(&account).await
    }

    /// Daily-reset task: zeroes `today_used` for every account.
    pub async fn reset_daily_usage(&self) -> Result<(), StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn
                .prepare("SELECT id, data FROM accounts")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows: Vec<(String, String)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| StoreError::Storage(e.to_string()))?
                .filter_map(|r| r.ok())
                .collect();
            for (id, data) in rows {
                let mut account: Account = serde_json::from_str(&data)?;
                account.today_used = 0;
                let data = serde_json::to_string(&account)?;
                conn.execute(
                    "UPDATE accounts SET data = ?1 WHERE id = ?2",
                    rusqlite::params![&data, &id],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            }
            Ok(())
        })
    }

    // ---- config ----------------------------------------------------------

    pub async fn get_config(&self) -> Result<AppConfig, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let data: Option<String> = conn
                .query_row("SELECT data FROM app_config WHERE id = 1", [], |row| row.get(0))
                .ok();
            match data {
                Some(d) => Ok(serde_json::from_str(&d)?),
                None => Ok(AppConfig::default()),
            }
        })
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<(), StoreError> {
        let data = serde_json::to_string(config)?;
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO app_config (id, data) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                rusqlite::params![&data],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    // ---- logs --------------------------------------------------------------

    pub async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let data = serde_json::to_string(entry)?;
        let db = self.db.clone();
        let id = entry.id.clone();
        let ts = entry.timestamp_ms;
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO logs (id, timestamp_ms, data) VALUES (?1, ?2, ?3)",
                rusqlite::params![&id, ts, &data],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    pub async fn list_logs(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn
                .prepare("SELECT data FROM logs ORDER BY timestamp_ms DESC LIMIT ?1")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![limit as i64], |row| row.get::<_, String>(0))
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                let data = row.map_err(|e| StoreError::Storage(e.to_string()))?;
                out.push(serde_json::from_str(&data)?);
            }
            Ok(out)
        })
    }

    /// Prunes logs older than `cutoff_ms`, implementing `log_retention_days`.
    pub async fn prune_logs_older_than(&self, cutoff_ms: i64) -> Result<usize, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let n = conn
                .execute(
                    "DELETE FROM logs WHERE timestamp_ms < ?1",
                    rusqlite::params![cutoff_ms],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(n)
        })
    }
}
