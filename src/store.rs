//! [`ProgressStore`] implementations.
//!
//! The session is persisted as a flat key-value layout, one JSON value per
//! key:
//!
//! | Key | Value |
//! |-----|-------|
//! | `credential` | string |
//! | `rows` | array of row records |
//! | `columns` | array of column names |
//! | `selected_columns` | array of column names |
//! | `index` | integer |
//! | `results` | array of log entries |
//! | `message_locked` | bool |
//! | `locked_message` | string |
//! | `previous_item` | string or null |
//!
//! Retry counters are not part of the layout. Missing keys load as their
//! defaults, so an empty store yields a fresh session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::session::{MessageLock, Session};
use crate::traits::ProgressStore;

pub const KEY_CREDENTIAL: &str = "credential";
pub const KEY_ROWS: &str = "rows";
pub const KEY_COLUMNS: &str = "columns";
pub const KEY_SELECTED_COLUMNS: &str = "selected_columns";
pub const KEY_INDEX: &str = "index";
pub const KEY_RESULTS: &str = "results";
pub const KEY_MESSAGE_LOCKED: &str = "message_locked";
pub const KEY_LOCKED_MESSAGE: &str = "locked_message";
pub const KEY_PREVIOUS_ITEM: &str = "previous_item";

/// Encode a session into `(key, json)` pairs.
pub fn encode(session: &Session) -> Result<Vec<(&'static str, String)>> {
    fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    Ok(vec![
        (KEY_CREDENTIAL, json(&session.credential)?),
        (KEY_ROWS, json(&session.rows)?),
        (KEY_COLUMNS, json(&session.columns)?),
        (KEY_SELECTED_COLUMNS, json(&session.selected_columns)?),
        (KEY_INDEX, json(&session.index)?),
        (KEY_RESULTS, json(&session.results)?),
        (KEY_MESSAGE_LOCKED, json(&session.message_lock.locked)?),
        (KEY_LOCKED_MESSAGE, json(&session.message_lock.message)?),
        (KEY_PREVIOUS_ITEM, json(&session.previous_item)?),
    ])
}

/// Rebuild a session from stored pairs. Absent keys take their defaults.
pub fn decode(values: &HashMap<String, String>) -> Result<Session> {
    fn field<T: DeserializeOwned + Default>(
        values: &HashMap<String, String>,
        key: &str,
    ) -> Result<T> {
        match values.get(key) {
            Some(raw) => serde_json::from_str(raw)
                .with_context(|| format!("Corrupt value for state key '{}'", key)),
            None => Ok(T::default()),
        }
    }

    Ok(Session {
        credential: field(values, KEY_CREDENTIAL)?,
        rows: field(values, KEY_ROWS)?,
        columns: field(values, KEY_COLUMNS)?,
        selected_columns: field(values, KEY_SELECTED_COLUMNS)?,
        index: field(values, KEY_INDEX)?,
        results: field(values, KEY_RESULTS)?,
        message_lock: MessageLock {
            locked: field(values, KEY_MESSAGE_LOCKED)?,
            message: field(values, KEY_LOCKED_MESSAGE)?,
        },
        previous_item: field(values, KEY_PREVIOUS_ITEM)?,
    })
}

/// SQLite implementation of [`ProgressStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = crate::db::connect(path)
            .await
            .with_context(|| format!("Failed to open state file: {}", path.display()))?;
        crate::migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ProgressStore for SqliteStore {
    async fn load(&self) -> Result<Session> {
        let rows = sqlx::query("SELECT key, value FROM kv")
            .fetch_all(&self.pool)
            .await?;

        let mut values = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            values.insert(key, value);
        }
        decode(&values)
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let pairs = encode(session)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        for (key, value) in pairs {
            sqlx::query(
                r#"
                INSERT INTO kv (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(&value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(index = session.index, "session checkpointed");
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
///
/// Holds the encoded layout rather than a `Session` so that it exercises
/// the same encode/decode path as the SQLite store.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
    saves: RwLock<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.read().map(|n| *n).unwrap_or(0)
    }

    /// Raw stored value for `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.read().ok().and_then(|v| v.get(key).cloned())
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn load(&self) -> Result<Session> {
        let values = self
            .values
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        decode(&values)
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let pairs = encode(session)?;
        let mut values = self
            .values
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        for (key, value) in pairs {
            values.insert(key.to_string(), value);
        }
        if let Ok(mut saves) = self.saves.write() {
            *saves += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogEntry, LogStatus, RowRecord};
    use chrono::Utc;

    fn sample() -> Session {
        let mut session = Session {
            credential: "secret".into(),
            rows: vec![RowRecord::new("1").with("type", "TV")],
            columns: vec!["type".into()],
            selected_columns: vec!["type".into()],
            index: 1,
            previous_item: Some("1".into()),
            ..Session::default()
        };
        session.results.append(LogEntry {
            timestamp: Utc::now(),
            id: "1".into(),
            name: "One".into(),
            status: LogStatus::Success,
            message: "updated: type".into(),
        });
        session.lock_message("bulk");
        session
    }

    #[tokio::test]
    async fn test_memory_store_empty_loads_default() {
        let store = MemoryStore::new();
        assert_eq!(store.load().await.unwrap(), Session::default());
    }

    #[tokio::test]
    async fn test_memory_store_layout() {
        let store = MemoryStore::new();
        let session = sample();
        store.save(&session).await.unwrap();

        assert_eq!(store.raw(KEY_INDEX).as_deref(), Some("1"));
        assert_eq!(store.raw(KEY_MESSAGE_LOCKED).as_deref(), Some("true"));
        assert_eq!(store.raw(KEY_LOCKED_MESSAGE).as_deref(), Some("\"bulk\""));
        assert!(store.raw("retries").is_none());
        assert_eq!(store.load().await.unwrap(), session);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.sqlite");
        let session = sample();

        {
            let store = SqliteStore::open(&path).await.unwrap();
            assert_eq!(store.load().await.unwrap(), Session::default());
            store.save(&session).await.unwrap();
            store.close().await;
        }

        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(store.load().await.unwrap(), session);

        let mut advanced = session.clone();
        advanced.index = 2;
        advanced.unlock_message();
        store.save(&advanced).await.unwrap();
        assert_eq!(store.load().await.unwrap(), advanced);
        store.close().await;
    }

    #[test]
    fn test_decode_rejects_corrupt_value() {
        let values = HashMap::from([(KEY_INDEX.to_string(), "\"nope\"".to_string())]);
        let err = decode(&values).unwrap_err();
        assert!(err.to_string().contains("index"));
    }
}
