//! Resume checkpoints.
//!
//! Before each row is processed its number is written to the checkpoint
//! store under a key derived from everything that decides which rows a
//! run sees. A later run with the same options can then pick up at that
//! row. The checkpoint is cleared when a run completes.

use std::collections::BTreeMap;

use chrono::Duration;
use salvage_core::{CheckpointStore, StoreError};
use sha2::{Digest, Sha256};

pub const RESUME_KEY_PREFIX: &str = "salvage:resume:";

/// Build a resume key from the values that affect which rows are read.
/// Key order does not matter.
pub fn resume_key<'a>(values: impl IntoIterator<Item = (&'a str, String)>) -> String {
    let sorted: BTreeMap<&str, String> = values.into_iter().collect();
    let mut hasher = Sha256::new();
    for (key, value) in &sorted {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    format!("{}{:x}", RESUME_KEY_PREFIX, hasher.finalize())
}

/// Progress of one import, persisted under its resume key.
pub struct ResumeCheckpoint<'a> {
    store: &'a dyn CheckpointStore,
    key: String,
    ttl: Duration,
}

impl<'a> ResumeCheckpoint<'a> {
    pub fn new(store: &'a dyn CheckpointStore, key: String, ttl: Duration) -> Self {
        Self { store, key, ttl }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The row to resume from, if a previous run left one.
    pub fn load(&self) -> Result<Option<u64>, StoreError> {
        let Some(value) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        match value.parse() {
            Ok(row) => Ok(Some(row)),
            Err(_) => {
                log::warn!("Ignoring unreadable resume progress '{}' at {}", value, self.key);
                Ok(None)
            }
        }
    }

    pub fn save(&self, row: u64) -> Result<(), StoreError> {
        self.store.set(&self.key, &row.to_string(), self.ttl)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salvage_db::SqliteCheckpoints;

    #[test]
    fn keys_ignore_option_order() {
        let a = resume_key([("command", "news".to_string()), ("row", "3".to_string())]);
        let b = resume_key([("row", "3".to_string()), ("command", "news".to_string())]);
        let c = resume_key([("command", "news".to_string()), ("row", "4".to_string())]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with(RESUME_KEY_PREFIX));
        assert_eq!(a.len(), RESUME_KEY_PREFIX.len() + 64);
    }

    #[test]
    fn progress_round_trips_and_clears() {
        let store = SqliteCheckpoints::open_memory().unwrap();
        let key = resume_key([("command", "news".to_string())]);
        let checkpoint = ResumeCheckpoint::new(&store, key, Duration::hours(24));
        assert_eq!(checkpoint.load().unwrap(), None);

        checkpoint.save(6).unwrap();
        assert_eq!(checkpoint.load().unwrap(), Some(6));

        checkpoint.clear().unwrap();
        assert_eq!(checkpoint.load().unwrap(), None);
    }

    #[test]
    fn unreadable_progress_is_ignored() {
        let store = SqliteCheckpoints::open_memory().unwrap();
        let checkpoint = ResumeCheckpoint::new(&store, "k".into(), Duration::hours(1));
        store.set("k", "not a row", Duration::hours(1)).unwrap();
        assert_eq!(checkpoint.load().unwrap(), None);
    }
}
