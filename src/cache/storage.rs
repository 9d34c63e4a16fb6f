//! Cache storage backends: in-memory, SQLite, and a no-op.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::traits::{CacheEntry, CacheStorage};
use crate::operation::{FetchKey, QueryIdentity};

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - every lookup misses.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get_entry(&self, _identity: &QueryIdentity, _key: FetchKey) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn store(&self, _identity: &QueryIdentity, _key: FetchKey, _payload: &Arc<Value>) -> Result<()> {
    Ok(()) // Discard
  }

  fn mark_stale(&self, _identity: &QueryIdentity) -> Result<usize> {
    Ok(0)
  }

  fn mark_all_stale(&self) -> Result<usize> {
    Ok(0)
  }

  fn len(&self) -> Result<usize> {
    Ok(0)
  }
}

/// Per-session in-memory storage.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<(QueryIdentity, FetchKey), CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn get_entry(&self, identity: &QueryIdentity, key: FetchKey) -> Result<Option<CacheEntry>> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(entries.get(&(identity.clone(), key)).cloned())
  }

  fn store(&self, identity: &QueryIdentity, key: FetchKey, payload: &Arc<Value>) -> Result<()> {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.insert(
      (identity.clone(), key),
      CacheEntry {
        payload: Arc::clone(payload),
        stale: false,
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn mark_stale(&self, identity: &QueryIdentity) -> Result<usize> {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    let mut changed = 0;
    for ((id, _), entry) in entries.iter_mut() {
      if id == identity && !entry.stale {
        entry.stale = true;
        changed += 1;
      }
    }
    Ok(changed)
  }

  fn mark_all_stale(&self) -> Result<usize> {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    let mut changed = 0;
    for entry in entries.values_mut().filter(|e| !e.stale) {
      entry.stale = true;
      changed += 1;
    }
    Ok(changed)
  }

  fn len(&self) -> Result<usize> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(entries.len())
  }
}

/// SQLite-based cache storage, for results that outlive the session.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per (query, fetch key) slot; payload is serialized JSON
CREATE TABLE IF NOT EXISTS result_cache (
    query_hash TEXT NOT NULL,
    query_name TEXT NOT NULL,
    fetch_key INTEGER NOT NULL,
    payload BLOB NOT NULL,
    stale INTEGER NOT NULL DEFAULT 0,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (query_hash, fetch_key)
);

CREATE INDEX IF NOT EXISTS idx_result_cache_query ON result_cache(query_hash);
"#;

impl SqliteStorage {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("refetch").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for SqliteStorage {
  fn get_entry(&self, identity: &QueryIdentity, key: FetchKey) -> Result<Option<CacheEntry>> {
    let conn = self.conn()?;

    let row: Option<(Vec<u8>, bool, String)> = conn
      .query_row(
        "SELECT payload, stale, cached_at FROM result_cache
         WHERE query_hash = ? AND fetch_key = ?",
        params![identity.hash(), key_to_sql(key)?],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry for {}: {}", identity, e))?;

    match row {
      Some((data, stale, cached_at)) => {
        let payload: Value = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached payload for {}: {}", identity, e))?;
        Ok(Some(CacheEntry {
          payload: Arc::new(payload),
          stale,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn store(&self, identity: &QueryIdentity, key: FetchKey, payload: &Arc<Value>) -> Result<()> {
    let conn = self.conn()?;
    let data = serde_json::to_vec(payload.as_ref())
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO result_cache
           (query_hash, query_name, fetch_key, payload, stale, cached_at)
         VALUES (?, ?, ?, ?, 0, datetime('now'))",
        params![identity.hash(), identity.name(), key_to_sql(key)?, data],
      )
      .map_err(|e| eyre!("Failed to store cache entry for {}: {}", identity, e))?;

    Ok(())
  }

  fn mark_stale(&self, identity: &QueryIdentity) -> Result<usize> {
    let conn = self.conn()?;
    conn
      .execute(
        "UPDATE result_cache SET stale = 1 WHERE query_hash = ? AND stale = 0",
        params![identity.hash()],
      )
      .map_err(|e| eyre!("Failed to invalidate {}: {}", identity, e))
  }

  fn mark_all_stale(&self) -> Result<usize> {
    let conn = self.conn()?;
    conn
      .execute("UPDATE result_cache SET stale = 1 WHERE stale = 0", [])
      .map_err(|e| eyre!("Failed to invalidate cache: {}", e))
  }

  fn len(&self) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM result_cache", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }
}

fn key_to_sql(key: FetchKey) -> Result<i64> {
  i64::try_from(key.value()).map_err(|_| eyre!("Fetch key {} does not fit in SQLite", key))
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::operation::Operation;
  use serde_json::json;

  fn identity(name: &str) -> QueryIdentity {
    Operation::new(name, format!("query {} {{ x }}", name)).identity()
  }

  fn backends() -> Vec<(&'static str, Box<dyn CacheStorage>)> {
    vec![
      ("memory", Box::new(MemoryStorage::new())),
      ("sqlite", Box::new(SqliteStorage::open_in_memory().unwrap())),
    ]
  }

  #[test]
  fn test_slots_are_distinct_per_key() {
    for (name, storage) in backends() {
      let q = identity("Q");
      storage.store(&q, FetchKey::new(0), &Arc::new(json!({"v": 0}))).unwrap();

      assert!(
        storage.get_entry(&q, FetchKey::new(1)).unwrap().is_none(),
        "{name}: key 1 must not see key 0's payload"
      );
      let entry = storage.get_entry(&q, FetchKey::new(0)).unwrap().unwrap();
      assert_eq!(*entry.payload, json!({"v": 0}), "{name}");
      assert!(!entry.stale, "{name}");
    }
  }

  #[test]
  fn test_mark_stale_keeps_payload() {
    for (name, storage) in backends() {
      let q = identity("Q");
      let other = identity("Other");
      storage.store(&q, FetchKey::new(0), &Arc::new(json!(1))).unwrap();
      storage.store(&q, FetchKey::new(1), &Arc::new(json!(2))).unwrap();
      storage.store(&other, FetchKey::new(0), &Arc::new(json!(3))).unwrap();

      assert_eq!(storage.mark_stale(&q).unwrap(), 2, "{name}");

      let entry = storage.get_entry(&q, FetchKey::new(1)).unwrap().unwrap();
      assert!(entry.stale, "{name}");
      assert_eq!(*entry.payload, json!(2), "{name}");
      assert!(!storage.get_entry(&other, FetchKey::new(0)).unwrap().unwrap().stale, "{name}");
      assert_eq!(storage.len().unwrap(), 3, "{name}");
    }
  }

  #[test]
  fn test_mark_all_stale_then_store_refreshes() {
    for (name, storage) in backends() {
      let q = identity("Q");
      let other = identity("Other");
      storage.store(&q, FetchKey::new(0), &Arc::new(json!(1))).unwrap();
      storage.store(&other, FetchKey::new(4), &Arc::new(json!(2))).unwrap();

      assert_eq!(storage.mark_all_stale().unwrap(), 2, "{name}");
      assert_eq!(storage.mark_all_stale().unwrap(), 0, "{name}");
      assert!(storage.get_entry(&other, FetchKey::new(4)).unwrap().unwrap().stale, "{name}");

      storage.store(&q, FetchKey::new(0), &Arc::new(json!(5))).unwrap();
      let entry = storage.get_entry(&q, FetchKey::new(0)).unwrap().unwrap();
      assert!(!entry.stale, "{name}");
      assert_eq!(*entry.payload, json!(5), "{name}");
    }
  }

  #[test]
  fn test_noop_always_misses() {
    let storage = NoopStorage;
    let q = identity("Q");
    storage.store(&q, FetchKey::INITIAL, &Arc::new(json!(1))).unwrap();
    assert!(storage.get_entry(&q, FetchKey::INITIAL).unwrap().is_none());
    assert_eq!(storage.len().unwrap(), 0);
  }

  #[test]
  fn test_sqlite_reopens_file() {
    let dir = std::env::temp_dir().join(format!("refetch-test-{}", std::process::id()));
    let path = dir.join("cache.db");
    let q = identity("Q");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.store(&q, FetchKey::new(2), &Arc::new(json!({"ok": true}))).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let entry = storage.get_entry(&q, FetchKey::new(2)).unwrap().unwrap();
    assert_eq!(*entry.payload, json!({"ok": true}));

    let _ = std::fs::remove_dir_all(&dir);
  }
}
