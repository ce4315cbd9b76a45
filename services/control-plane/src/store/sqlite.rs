//! SQLite-backed store for durable control plane state.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{KvStore, StoreError, StoreResult};

/// A single-table key-value store.
///
/// Operations are short and run on the calling task while holding the
/// connection lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        debug!("Store schema initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> StoreResult<T> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn).map_err(Into::into)
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    async fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    async fn create(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|rows| rows == 1)
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map(|rows| rows == 1)
        })
    }

    async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM kv
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crud() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert!(store.create("/k/a", "1").await.unwrap());
        assert!(!store.create("/k/a", "2").await.unwrap());
        assert_eq!(store.get("/k/a").await.unwrap().as_deref(), Some("1"));

        store.put("/k/a", "3").await.unwrap();
        assert_eq!(store.get("/k/a").await.unwrap().as_deref(), Some("3"));

        assert!(store.delete("/k/a").await.unwrap());
        assert!(!store.delete("/k/a").await.unwrap());
        assert!(store.get("/k/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("/k/changed/0101/b", "t").await.unwrap();
        store.put("/k/changed/0101/a", "t").await.unwrap();
        store.put("/k/changedx", "t").await.unwrap();

        let keys: Vec<_> = store
            .list_prefix("/k/changed/")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["/k/changed/0101/a", "/k/changed/0101/b"]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("/k/a", "persisted").await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("/k/a").await.unwrap().as_deref(),
            Some("persisted")
        );
    }
}
