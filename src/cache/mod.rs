//! Result caching keyed by query identity and fetch key.
//!
//! This module provides:
//! - Entries addressed by the exact (identity, fetch key) pair
//! - Point and whole-store invalidation that marks entries stale without dropping them
//! - In-memory, SQLite and no-op storage backends

mod layer;
mod storage;
mod traits;

pub use layer::ResultCache;
pub use storage::{MemoryStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheResult, CacheSource, CacheStorage};
