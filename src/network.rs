//! The network seam the fetch coordinator issues requests through.
//!
//! The real transport lives outside this crate. Two implementations ship here:
//! `MockNetwork`, resolved by hand from tests, and `ScriptedNetwork`, which
//! replays configured payloads after a fixed latency for the demo binary.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use crate::fault::Fault;
use crate::operation::{FetchKey, Operation};

/// A future resolving to a response payload or a transport fault.
pub type NetworkFuture = BoxFuture<'static, Result<Value, Fault>>;

/// One outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub operation: Operation,
  pub fetch_key: FetchKey,
}

/// A transport. The request counts as issued once `execute` returns.
pub trait Network: Send + Sync {
  fn execute(&self, request: &Request) -> NetworkFuture;
}

struct PendingOperation {
  request: Request,
  responder: oneshot::Sender<Result<Value, Fault>>,
}

#[derive(Default)]
struct MockState {
  pending: Vec<PendingOperation>,
  issued: usize,
}

/// Network double whose requests stay pending until a test resolves them.
#[derive(Clone, Default)]
pub struct MockNetwork {
  state: Arc<Mutex<MockState>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Requests issued and not yet answered, oldest first.
  pub fn pending_operations(&self) -> Vec<Request> {
    let state = self.lock();
    state.pending.iter().map(|p| p.request.clone()).collect()
  }

  /// Total number of requests issued so far.
  pub fn request_count(&self) -> usize {
    self.lock().issued
  }

  /// Answer the most recent pending request with `payload`.
  ///
  /// Returns the request that was answered, or `None` if nothing was pending.
  pub fn resolve_most_recent(&self, payload: Value) -> Option<Request> {
    self.answer_most_recent(Ok(payload))
  }

  /// Fail the most recent pending request with a transport fault.
  pub fn reject_most_recent(&self, message: &str) -> Option<Request> {
    self.answer_most_recent(Err(Fault::transport(message)))
  }

  fn answer_most_recent(&self, response: Result<Value, Fault>) -> Option<Request> {
    let pending = self.lock().pending.pop()?;
    debug!(
      query = pending.request.operation.name(),
      key = %pending.request.fetch_key,
      ok = response.is_ok(),
      "mock network answering request"
    );
    // The receiver is gone if the fetch was dropped; nothing to deliver then.
    let _ = pending.responder.send(response);
    Some(pending.request)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Network for MockNetwork {
  fn execute(&self, request: &Request) -> NetworkFuture {
    let (tx, rx) = oneshot::channel();
    {
      let mut state = self.lock();
      state.issued += 1;
      state.pending.push(PendingOperation {
        request: request.clone(),
        responder: tx,
      });
    }

    async move {
      rx.await
        .unwrap_or_else(|_| Err(Fault::transport("request was cancelled")))
    }
    .boxed()
  }
}

/// Network that serves configured payloads in order after a fixed latency.
///
/// Once the script runs out the last payload is served again; an empty
/// script fails every request.
pub struct ScriptedNetwork {
  responses: Mutex<VecDeque<Value>>,
  last: Mutex<Option<Value>>,
  latency: Duration,
}

impl ScriptedNetwork {
  pub fn new(responses: Vec<Value>, latency: Duration) -> Self {
    Self {
      responses: Mutex::new(responses.into()),
      last: Mutex::new(None),
      latency,
    }
  }

  fn next_response(&self) -> Option<Value> {
    let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
    let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(next) = responses.pop_front() {
      *last = Some(next);
    }
    last.clone()
  }
}

impl Network for ScriptedNetwork {
  fn execute(&self, request: &Request) -> NetworkFuture {
    let response = self.next_response();
    let latency = self.latency;
    debug!(
      query = request.operation.name(),
      key = %request.fetch_key,
      "scripted network accepted request"
    );

    async move {
      tokio::time::sleep(latency).await;
      response.ok_or_else(|| Fault::transport("no scripted response available"))
    }
    .boxed()
  }
}
