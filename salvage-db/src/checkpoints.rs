//! Durable key/value storage with expiry.

use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use salvage_core::{CheckpointStore, StoreError};

use crate::schema::open_memory;
use crate::store::DbError;

pub struct SqliteCheckpoints {
    conn: Connection,
}

impl SqliteCheckpoints {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open_memory() -> Result<Self, DbError> {
        Ok(Self::new(open_memory()?))
    }

    /// Delete every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "DELETE FROM checkpoints WHERE expires_at <= ?1",
            params![Utc::now().timestamp()],
        )?)
    }
}

impl CheckpointStore for SqliteCheckpoints {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT value, expires_at FROM checkpoints WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(DbError::from)?;

        match row {
            Some((value, expires_at)) if expires_at > Utc::now().timestamp() => Ok(Some(value)),
            Some(_) => {
                self.delete(key)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = (Utc::now() + ttl).timestamp();
        self.conn
            .execute(
                "INSERT INTO checkpoints (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )
            .map_err(DbError::from)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM checkpoints WHERE key = ?1", params![key])
            .map_err(DbError::from)?;
        Ok(())
    }
}
