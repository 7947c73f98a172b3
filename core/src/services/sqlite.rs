use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::storage::KvStore;
use crate::error::Result;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#;

/// SQLite backed key-value storage. Compare-and-swap is a single conditional
/// statement, so it stays atomic across processes sharing the file.
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteKvStore {
    /// Open the database at `path`, creating the table if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        Self::with_pool(Pool::new(manager)?)
    }

    /// Private in-memory database. Pinned to one connection since every
    /// in-memory connection would otherwise see its own database.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        Self::with_pool(Pool::builder().max_size(1).build(manager)?)
    }

    fn with_pool(pool: Pool<SqliteConnectionManager>) -> Result<Self> {
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.pool.get()?.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = match expected {
            None => conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
                params![key, value],
            )?,
            Some(old) => conn.execute(
                "UPDATE kv SET value = ?3 WHERE key = ?1 AND value = ?2",
                params![key, old, value],
            )?,
        };
        Ok(changed == 1)
    }
}
