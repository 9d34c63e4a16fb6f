//! Core traits and types for the result cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;

use crate::operation::{FetchKey, QueryIdentity};

/// A cached payload for one (identity, fetch key) slot.
///
/// Invalidation flips `stale`; the payload itself is kept.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub payload: Arc<Value>,
  pub stale: bool,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Entries are addressed by the exact (identity, key) pair. Backends never
/// drop entries on their own; invalidation only marks them stale.
pub trait CacheStorage: Send + Sync {
  /// Get the entry for a slot, stale or not.
  fn get_entry(&self, identity: &QueryIdentity, key: FetchKey) -> Result<Option<CacheEntry>>;

  /// Create or overwrite the entry for a slot and mark it fresh.
  fn store(&self, identity: &QueryIdentity, key: FetchKey, payload: &Arc<Value>) -> Result<()>;

  /// Mark every entry of one identity stale. Returns how many entries changed.
  fn mark_stale(&self, identity: &QueryIdentity) -> Result<usize>;

  /// Mark every entry stale. Returns how many entries changed.
  fn mark_all_stale(&self) -> Result<usize>;

  /// Number of stored entries, stale included.
  fn len(&self) -> Result<usize>;
}

/// Result from a resolve, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where resolved data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Delivered by a network request
  Network,
  /// Served from a fresh cache entry without suspending
  Cache,
}
