//! Fetch coordination: serve from cache or issue one network request per slot.
//!
//! `resolve` either returns a fresh cache entry right away or hands back a
//! `PendingFetch` the caller can poll from its tick loop or await.
//!
//! # Example
//!
//! ```ignore
//! let coordinator = FetchCoordinator::new(cache.clone(), Arc::new(network));
//!
//! match coordinator.resolve(&operation, fetch_key)? {
//!     Resolution::Ready(result) => render(&result.data),
//!     Resolution::Pending(pending) => {
//!         // In event loop tick
//!         if let Some(outcome) = pending.try_take() {
//!             // Payload or transport fault arrived
//!         }
//!     }
//! }
//! ```

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, ResultCache};
use crate::fault::Fault;
use crate::network::{Network, Request};
use crate::operation::{FetchKey, Operation};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, Fault>>>;

/// Cache slot a request is in flight for: identity hash plus fetch key.
type Slot = (String, FetchKey);

/// Outcome of a resolve.
pub enum Resolution {
  /// A fresh cache entry existed; no request was issued.
  Ready(CacheResult<Arc<Value>>),
  /// A request is in flight for the slot.
  Pending(PendingFetch),
}

impl Resolution {
  pub fn is_pending(&self) -> bool {
    matches!(self, Resolution::Pending(_))
  }
}

impl std::fmt::Debug for Resolution {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Resolution::Ready(result) => f.debug_tuple("Ready").field(&result.source).finish(),
      Resolution::Pending(pending) => f.debug_tuple("Pending").field(&pending.request).finish(),
    }
  }
}

/// Handle on an in-flight request. Clones observe the same response.
#[derive(Clone)]
pub struct PendingFetch {
  request: Request,
  fetch: SharedFetch,
}

impl PendingFetch {
  pub fn request(&self) -> &Request {
    &self.request
  }

  pub fn fetch_key(&self) -> FetchKey {
    self.request.fetch_key
  }

  /// Poll for the response without blocking.
  ///
  /// Returns `None` while the request is outstanding. Call this in your
  /// event loop tick handler.
  pub fn try_take(&self) -> Option<Result<Arc<Value>, Fault>> {
    self.fetch.clone().now_or_never()
  }

  /// Wait for the response.
  pub async fn wait(self) -> Result<Arc<Value>, Fault> {
    self.fetch.await
  }
}

/// Serves resolves from the result cache, falling back to the network.
///
/// The coordinator reads the fetch key it is given and never changes it.
#[derive(Clone)]
pub struct FetchCoordinator {
  cache: ResultCache,
  network: Arc<dyn Network>,
  in_flight: Arc<Mutex<HashMap<Slot, SharedFetch>>>,
}

impl FetchCoordinator {
  pub fn new(cache: ResultCache, network: Arc<dyn Network>) -> Self {
    Self {
      cache,
      network,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn cache(&self) -> &ResultCache {
    &self.cache
  }

  /// Resolve `operation` under `key`.
  ///
  /// A fresh cache entry for exactly this slot is returned without suspending.
  /// Otherwise one request is issued (or joined, if already in flight) and
  /// driven on a spawned task, so it completes even if nobody awaits it.
  /// Must be called from within a tokio runtime.
  pub fn resolve(&self, operation: &Operation, key: FetchKey) -> Result<Resolution> {
    let identity = operation.identity();

    if let Some(result) = self.cache.get(&identity, key)? {
      return Ok(Resolution::Ready(result));
    }

    let request = Request {
      operation: operation.clone(),
      fetch_key: key,
    };
    let slot: Slot = (identity.hash().to_string(), key);

    let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(fetch) = in_flight.get(&slot) {
      debug!(query = %identity, %key, "joining in-flight request");
      return Ok(Resolution::Pending(PendingFetch {
        request,
        fetch: fetch.clone(),
      }));
    }

    // The driver task writes the cache before it releases the slot, so with
    // the lock held a vanished slot means the entry is already there.
    if let Some(result) = self.cache.get(&identity, key)? {
      return Ok(Resolution::Ready(result));
    }

    let runtime = tokio::runtime::Handle::try_current()
      .map_err(|e| eyre!("Fetch coordinator needs a tokio runtime: {}", e))?;

    info!(query = %identity, %key, "issuing network request");
    let response = self.network.execute(&request);

    let cache = self.cache.clone();
    let registry = Arc::clone(&self.in_flight);
    let task_slot = slot.clone();
    let fetch = async move {
      let result = response.await.map(Arc::new);
      match &result {
        Ok(payload) => {
          if let Err(e) = cache.put(&identity, key, payload) {
            warn!(query = %identity, %key, error = %e, "failed to cache payload");
          }
        }
        Err(fault) => {
          warn!(query = %identity, %key, %fault, "network request failed");
        }
      }
      // Release the slot before anyone observes the result.
      registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&task_slot);
      result
    }
    .boxed()
    .shared();

    in_flight.insert(slot, fetch.clone());
    drop(in_flight);

    runtime.spawn(fetch.clone());

    Ok(Resolution::Pending(PendingFetch { request, fetch }))
  }

  /// Resolve and wait, tagging where the payload came from.
  pub async fn fetch(
    &self,
    operation: &Operation,
    key: FetchKey,
  ) -> Result<std::result::Result<CacheResult<Arc<Value>>, Fault>> {
    match self.resolve(operation, key)? {
      Resolution::Ready(result) => Ok(Ok(result)),
      Resolution::Pending(pending) => Ok(pending.wait().await.map(CacheResult::from_network)),
    }
  }

  /// Number of requests currently in flight.
  pub fn in_flight_count(&self) -> usize {
    self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }
}
