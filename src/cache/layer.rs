//! The result cache shared by the fetch coordinator and the recovery controller.

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::storage::{MemoryStorage, NoopStorage, SqliteStorage};
use super::traits::{CacheEntry, CacheResult, CacheStorage};
use crate::config::{CacheBackend, CacheConfig};
use crate::operation::{FetchKey, QueryIdentity};

/// Result cache keyed by (query identity, fetch key).
///
/// Built once per session and passed by handle to whatever needs it; clones
/// share the same storage.
pub struct ResultCache {
  storage: Arc<dyn CacheStorage>,
}

impl ResultCache {
  /// Create a new result cache with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  pub fn in_memory() -> Self {
    Self::new(MemoryStorage::new())
  }

  /// Build the cache the configuration asks for.
  pub fn from_config(config: &CacheConfig) -> Result<Self> {
    let cache = match config.backend {
      CacheBackend::Memory => Self::in_memory(),
      CacheBackend::None => Self::new(NoopStorage),
      CacheBackend::Sqlite => {
        let path = match &config.path {
          Some(p) => p.clone(),
          None => SqliteStorage::default_path()?,
        };
        debug!(path = %path.display(), "opening sqlite result cache");
        Self::new(SqliteStorage::open(&path)?)
      }
    };
    Ok(cache)
  }

  /// Payload for exactly this slot, if a fresh entry exists.
  pub fn get(
    &self,
    identity: &QueryIdentity,
    key: FetchKey,
  ) -> Result<Option<CacheResult<Arc<Value>>>> {
    match self.storage.get_entry(identity, key)? {
      Some(entry) if !entry.stale => {
        debug!(query = %identity, %key, "cache hit");
        Ok(Some(CacheResult::from_cache(entry.payload, entry.cached_at)))
      }
      Some(_) => {
        debug!(query = %identity, %key, "cache entry is stale");
        Ok(None)
      }
      None => {
        debug!(query = %identity, %key, "cache miss");
        Ok(None)
      }
    }
  }

  /// Raw entry for a slot, stale ones included.
  pub fn entry(&self, identity: &QueryIdentity, key: FetchKey) -> Result<Option<CacheEntry>> {
    self.storage.get_entry(identity, key)
  }

  pub fn put(&self, identity: &QueryIdentity, key: FetchKey, payload: &Arc<Value>) -> Result<()> {
    self.storage.store(identity, key, payload)?;
    debug!(query = %identity, %key, "cached payload");
    Ok(())
  }

  /// Mark every entry for one query stale, under any fetch key.
  pub fn invalidate(&self, identity: &QueryIdentity) -> Result<()> {
    let changed = self.storage.mark_stale(identity)?;
    debug!(query = %identity, changed, "invalidated query");
    Ok(())
  }

  /// Mark the whole store stale. Nothing is refetched until someone asks.
  pub fn invalidate_all(&self) -> Result<()> {
    let changed = self.storage.mark_all_stale()?;
    debug!(changed, "invalidated store");
    Ok(())
  }

  pub fn len(&self) -> Result<usize> {
    self.storage.len()
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

impl Clone for ResultCache {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
