//! Fault tracking and the recovery transition.
//!
//! A boundary reports faults here and reads `(state, fetch key)` through
//! [`RecoveryController::snapshot`]. The recovery transition (invalidate,
//! advance the key, clear the fault) runs under the same lock, so no render
//! can see one sub-step without the others.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::fault::Fault;
use crate::operation::{FetchKey, QueryIdentity};

/// Holder for the consumer-owned fetch key.
///
/// Clones share the key. Subscribers are notified when it changes.
#[derive(Clone)]
pub struct FetchKeyState {
  tx: Arc<watch::Sender<FetchKey>>,
}

impl Default for FetchKeyState {
  fn default() -> Self {
    Self::new(FetchKey::INITIAL)
  }
}

impl FetchKeyState {
  pub fn new(initial: FetchKey) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self { tx: Arc::new(tx) }
  }

  pub fn current(&self) -> FetchKey {
    *self.tx.borrow()
  }

  /// Replace the key. Keys never move backwards.
  pub fn set(&self, key: FetchKey) -> Result<()> {
    let mut rejected = None;
    self.tx.send_if_modified(|current| {
      if key < *current {
        rejected = Some(*current);
        return false;
      }
      let changed = key != *current;
      *current = key;
      changed
    });
    match rejected {
      Some(current) => Err(eyre!(
        "Fetch key cannot move backwards (current {}, requested {})",
        current,
        key
      )),
      None => Ok(()),
    }
  }

  /// Move to the next key and return it.
  pub fn advance(&self) -> FetchKey {
    let mut next = FetchKey::INITIAL;
    self.tx.send_modify(|key| {
      *key = key.next();
      next = *key;
    });
    next
  }

  pub fn subscribe(&self) -> watch::Receiver<FetchKey> {
    self.tx.subscribe()
  }
}

/// Which cache entries a consumption recovery invalidates.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationScope {
  /// Mark the whole store stale
  #[default]
  All,
  /// Only the entries of the query that faulted
  Query,
}

/// Whether the boundary may mount its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryState {
  Clean,
  Faulted(Fault),
}

impl RecoveryState {
  pub fn is_faulted(&self) -> bool {
    matches!(self, RecoveryState::Faulted(_))
  }

  pub fn fault(&self) -> Option<&Fault> {
    match self {
      RecoveryState::Faulted(fault) => Some(fault),
      RecoveryState::Clean => None,
    }
  }
}

/// What a retry did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
  /// There was no fault to recover from.
  NothingToRecover,
  /// Transport fault cleared; the same key will be fetched again.
  RetrySameKey { key: FetchKey },
  /// Cache invalidated and key advanced; the next resolve hits an empty slot.
  Refetch { previous: FetchKey, key: FetchKey },
}

struct Inner {
  state: RecoveryState,
  origin: Option<(QueryIdentity, FetchKey)>,
}

/// Owns the recovery state of one boundary.
pub struct RecoveryController {
  cache: ResultCache,
  fetch_key: FetchKeyState,
  scope: InvalidationScope,
  inner: Mutex<Inner>,
}

impl RecoveryController {
  pub fn new(cache: ResultCache, fetch_key: FetchKeyState, scope: InvalidationScope) -> Self {
    Self {
      cache,
      fetch_key,
      scope,
      inner: Mutex::new(Inner {
        state: RecoveryState::Clean,
        origin: None,
      }),
    }
  }

  pub fn fetch_key(&self) -> &FetchKeyState {
    &self.fetch_key
  }

  pub fn scope(&self) -> InvalidationScope {
    self.scope
  }

  /// Current state and key, read together.
  pub fn snapshot(&self) -> (RecoveryState, FetchKey) {
    let inner = self.lock();
    (inner.state.clone(), self.fetch_key.current())
  }

  pub fn state(&self) -> RecoveryState {
    self.lock().state.clone()
  }

  /// Record a fault raised for `identity` under `key`.
  ///
  /// Only the first fault is kept until it is recovered or dismissed.
  pub fn observe(&self, fault: Fault, identity: &QueryIdentity, key: FetchKey) {
    let mut inner = self.lock();
    if let RecoveryState::Faulted(existing) = &inner.state {
      debug!(%fault, %existing, "already faulted, ignoring fault");
      return;
    }
    warn!(query = %identity, %key, %fault, "boundary caught fault");
    inner.state = RecoveryState::Faulted(fault);
    inner.origin = Some((identity.clone(), key));
  }

  /// Run the recovery action for the current fault.
  ///
  /// For a consumption fault this invalidates the cache, advances the fetch
  /// key and clears the fault as one transition. If invalidation fails
  /// nothing changes. A transport fault only clears, keeping the key.
  pub fn retry(&self) -> Result<RecoveryOutcome> {
    let mut inner = self.lock();

    let fault = match &inner.state {
      RecoveryState::Clean => return Ok(RecoveryOutcome::NothingToRecover),
      RecoveryState::Faulted(fault) => fault.clone(),
    };

    let outcome = match fault {
      Fault::Transport { .. } => {
        let key = self.fetch_key.current();
        info!(%key, "retrying request under the same key");
        RecoveryOutcome::RetrySameKey { key }
      }
      Fault::Consumption { .. } => {
        match (self.scope, &inner.origin) {
          (InvalidationScope::Query, Some((identity, _))) => self.cache.invalidate(identity)?,
          _ => self.cache.invalidate_all()?,
        }
        let previous = self.fetch_key.current();
        let key = self.fetch_key.advance();
        info!(%previous, %key, "invalidated cache and advanced fetch key");
        RecoveryOutcome::Refetch { previous, key }
      }
    };

    inner.state = RecoveryState::Clean;
    inner.origin = None;
    Ok(outcome)
  }

  /// Clear the fault without touching the cache or the key.
  ///
  /// Returns whether there was a fault to clear.
  pub fn dismiss(&self) -> bool {
    let mut inner = self.lock();
    let was_faulted = inner.state.is_faulted();
    if was_faulted {
      debug!("fault dismissed");
    }
    inner.state = RecoveryState::Clean;
    inner.origin = None;
    was_faulted
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::operation::Operation;
  use serde_json::json;

  fn identity(name: &str) -> QueryIdentity {
    Operation::new(name, format!("query {} {{ x }}", name)).identity()
  }

  fn controller(scope: InvalidationScope) -> (RecoveryController, ResultCache) {
    let cache = ResultCache::in_memory();
    let controller = RecoveryController::new(cache.clone(), FetchKeyState::default(), scope);
    (controller, cache)
  }

  fn consumption() -> Fault {
    Fault::consumption("viewer.accounts.edges[1].node", "node is null")
  }

  #[test]
  fn test_fetch_key_is_monotonic() {
    let key = FetchKeyState::default();
    assert_eq!(key.advance(), FetchKey::new(1));
    assert!(key.set(FetchKey::new(0)).is_err());
    key.set(FetchKey::new(5)).unwrap();
    assert_eq!(key.current(), FetchKey::new(5));
  }

  #[test]
  fn test_fetch_key_never_regresses_under_concurrent_set_and_advance() {
    let key = FetchKeyState::default();

    let advancer = {
      let key = key.clone();
      std::thread::spawn(move || {
        for _ in 0..2000 {
          key.advance();
        }
      })
    };
    let setter = {
      let key = key.clone();
      std::thread::spawn(move || {
        for n in 0..2000 {
          let _ = key.set(FetchKey::new(n));
        }
      })
    };

    let mut last = key.current();
    while !(advancer.is_finished() && setter.is_finished()) {
      let seen = key.current();
      assert!(seen >= last, "key moved from {} back to {}", last, seen);
      last = seen;
    }
    advancer.join().unwrap();
    setter.join().unwrap();
    assert!(key.current() >= FetchKey::new(1999));
  }

  #[test]
  fn test_setting_same_key_does_not_notify() {
    let key = FetchKeyState::new(FetchKey::new(3));
    let rx = key.subscribe();
    key.set(FetchKey::new(3)).unwrap();
    assert!(!rx.has_changed().unwrap());
    key.set(FetchKey::new(4)).unwrap();
    assert!(rx.has_changed().unwrap());
  }

  #[tokio::test]
  async fn test_fetch_key_notifies_subscribers() {
    let key = FetchKeyState::default();
    let mut rx = key.subscribe();
    key.advance();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), FetchKey::new(1));
  }

  #[test]
  fn test_consumption_retry_invalidates_and_advances() {
    let (controller, cache) = controller(InvalidationScope::All);
    let q = identity("Q");
    cache.put(&q, FetchKey::INITIAL, &Arc::new(json!("bad"))).unwrap();

    controller.observe(consumption(), &q, FetchKey::INITIAL);
    assert!(controller.state().is_faulted());

    let outcome = controller.retry().unwrap();
    assert_eq!(
      outcome,
      RecoveryOutcome::Refetch {
        previous: FetchKey::new(0),
        key: FetchKey::new(1)
      }
    );

    let (state, key) = controller.snapshot();
    assert_eq!(state, RecoveryState::Clean);
    assert_eq!(key, FetchKey::new(1));
    assert!(cache.get(&q, FetchKey::INITIAL).unwrap().is_none());
    assert!(cache.entry(&q, FetchKey::INITIAL).unwrap().unwrap().stale);
  }

  #[test]
  fn test_query_scope_leaves_other_queries_fresh() {
    let (controller, cache) = controller(InvalidationScope::Query);
    let q = identity("Q");
    let other = identity("Other");
    cache.put(&q, FetchKey::INITIAL, &Arc::new(json!(1))).unwrap();
    cache.put(&other, FetchKey::INITIAL, &Arc::new(json!(2))).unwrap();

    controller.observe(consumption(), &q, FetchKey::INITIAL);
    controller.retry().unwrap();

    assert!(cache.get(&q, FetchKey::INITIAL).unwrap().is_none());
    assert!(cache.get(&other, FetchKey::INITIAL).unwrap().is_some());
  }

  #[test]
  fn test_transport_retry_keeps_key_and_cache() {
    let (controller, cache) = controller(InvalidationScope::All);
    let q = identity("Q");
    let other = identity("Other");
    cache.put(&other, FetchKey::INITIAL, &Arc::new(json!(2))).unwrap();

    controller.observe(Fault::transport("timeout"), &q, FetchKey::INITIAL);
    let outcome = controller.retry().unwrap();

    assert_eq!(outcome, RecoveryOutcome::RetrySameKey { key: FetchKey::INITIAL });
    assert_eq!(controller.snapshot(), (RecoveryState::Clean, FetchKey::INITIAL));
    assert!(cache.get(&other, FetchKey::INITIAL).unwrap().is_some());
  }

  #[test]
  fn test_retry_when_clean_changes_nothing() {
    let (controller, _cache) = controller(InvalidationScope::All);
    assert_eq!(controller.retry().unwrap(), RecoveryOutcome::NothingToRecover);
    assert_eq!(controller.fetch_key().current(), FetchKey::INITIAL);
  }

  #[test]
  fn test_first_fault_wins() {
    let (controller, _cache) = controller(InvalidationScope::All);
    let q = identity("Q");
    controller.observe(consumption(), &q, FetchKey::INITIAL);
    controller.observe(Fault::transport("late"), &q, FetchKey::INITIAL);
    assert_eq!(controller.state().fault(), Some(&consumption()));
  }

  #[test]
  fn test_dismiss_leaves_cache_and_key_alone() {
    let (controller, cache) = controller(InvalidationScope::All);
    let q = identity("Q");
    cache.put(&q, FetchKey::INITIAL, &Arc::new(json!(1))).unwrap();

    // Nothing pending: dismissal is a no-op.
    assert!(!controller.dismiss());
    assert_eq!(controller.snapshot(), (RecoveryState::Clean, FetchKey::INITIAL));
    assert!(cache.get(&q, FetchKey::INITIAL).unwrap().is_some());

    controller.observe(consumption(), &q, FetchKey::INITIAL);
    assert!(controller.dismiss());
    assert_eq!(controller.snapshot(), (RecoveryState::Clean, FetchKey::INITIAL));
    assert!(cache.get(&q, FetchKey::INITIAL).unwrap().is_some());
  }
}
