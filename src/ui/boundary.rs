//! The recovery boundary: mounts one consumer and stands in for it on faults.

use color_eyre::Result;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::view::Consumer;
use crate::fault::Fault;
use crate::fetch::{FetchCoordinator, PendingFetch, Resolution};
use crate::operation::{FetchKey, Operation, QueryIdentity};
use crate::recovery::{RecoveryController, RecoveryOutcome, RecoveryState};

/// What the boundary currently shows.
#[derive(Debug)]
pub enum BoundaryView<T> {
  /// A request is outstanding
  Loading,
  /// The consumer's output for the payload fetched under `key`
  Ready { key: FetchKey, output: T },
  /// A fault was caught; the consumer is not mounted
  Faulted { message: String },
}

impl<T> BoundaryView<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, BoundaryView::Loading)
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, BoundaryView::Ready { .. })
  }

  pub fn is_faulted(&self) -> bool {
    matches!(self, BoundaryView::Faulted { .. })
  }

  pub fn output(&self) -> Option<&T> {
    match self {
      BoundaryView::Ready { output, .. } => Some(output),
      _ => None,
    }
  }
}

/// Supervises one consumer over the Clean/Faulted recovery states.
///
/// Call `evaluate()` on every tick or state change; it polls the pending
/// request, resolves under the current fetch key, and catches faults.
pub struct Boundary<C: Consumer> {
  consumer: C,
  operation: Operation,
  identity: QueryIdentity,
  coordinator: FetchCoordinator,
  recovery: Arc<RecoveryController>,
  view: BoundaryView<C::Output>,
  /// Key of the snapshot the current view was derived from
  shown_key: FetchKey,
  pending: Option<PendingFetch>,
}

impl<C: Consumer> Boundary<C> {
  pub fn new(
    consumer: C,
    operation: Operation,
    coordinator: FetchCoordinator,
    recovery: Arc<RecoveryController>,
  ) -> Self {
    let identity = operation.identity();
    let shown_key = recovery.fetch_key().current();
    Self {
      consumer,
      operation,
      identity,
      coordinator,
      recovery,
      view: BoundaryView::Loading,
      shown_key,
      pending: None,
    }
  }

  pub fn view(&self) -> &BoundaryView<C::Output> {
    &self.view
  }

  pub fn recovery(&self) -> &RecoveryController {
    &self.recovery
  }

  pub fn coordinator(&self) -> &FetchCoordinator {
    &self.coordinator
  }

  pub fn fetch_key(&self) -> FetchKey {
    self.recovery.fetch_key().current()
  }

  /// The fetch key the current view was evaluated under.
  pub fn shown_key(&self) -> FetchKey {
    self.shown_key
  }

  /// Re-derive the view from the recovery state and the cache.
  ///
  /// Returns `true` if the view changed.
  pub fn evaluate(&mut self) -> Result<bool> {
    let (state, key) = self.recovery.snapshot();
    self.shown_key = key;

    if let RecoveryState::Faulted(fault) = state {
      self.pending = None;
      return Ok(self.set_view(BoundaryView::Faulted {
        message: fault.message(),
      }));
    }

    if let BoundaryView::Ready { key: shown, .. } = &self.view {
      if *shown == key {
        return Ok(false);
      }
    }

    // A request for an older key can't satisfy this mount.
    if self.pending.as_ref().is_some_and(|p| p.fetch_key() != key) {
      debug!(%key, "dropping pending request for an old fetch key");
      self.pending = None;
    }

    let payload: Arc<Value> = match self.pending.take() {
      Some(pending) => match pending.try_take() {
        None => {
          self.pending = Some(pending);
          return Ok(self.set_view(BoundaryView::Loading));
        }
        Some(Ok(payload)) => payload,
        Some(Err(fault)) => return Ok(self.catch(fault, key)),
      },
      None => match self.coordinator.resolve(&self.operation, key)? {
        Resolution::Ready(result) => result.data,
        Resolution::Pending(pending) => {
          self.pending = Some(pending);
          return Ok(self.set_view(BoundaryView::Loading));
        }
      },
    };

    match self.consumer.consume(&payload) {
      Ok(output) => Ok(self.set_view(BoundaryView::Ready { key, output })),
      Err(fault) => Ok(self.catch(fault, key)),
    }
  }

  /// The recovery affordance: run the recovery action, then remount.
  pub fn retry(&mut self) -> Result<RecoveryOutcome> {
    let outcome = self.recovery.retry()?;
    self.evaluate()?;
    Ok(outcome)
  }

  /// Clear the fault without recovering, then remount.
  pub fn dismiss(&mut self) -> Result<bool> {
    let dismissed = self.recovery.dismiss();
    self.evaluate()?;
    Ok(dismissed)
  }

  fn catch(&mut self, fault: Fault, key: FetchKey) -> bool {
    self.recovery.observe(fault, &self.identity, key);
    let message = self
      .recovery
      .state()
      .fault()
      .map(Fault::message)
      .unwrap_or_default();
    self.set_view(BoundaryView::Faulted { message })
  }

  fn set_view(&mut self, view: BoundaryView<C::Output>) -> bool {
    let changed = match (&self.view, &view) {
      (BoundaryView::Loading, BoundaryView::Loading) => false,
      (BoundaryView::Faulted { message: a }, BoundaryView::Faulted { message: b }) => a != b,
      _ => true,
    };
    self.view = view;
    changed
  }

  /// Render the boundary and whatever it currently shows.
  pub fn render(&self, frame: &mut Frame, area: Rect) {
    let block = Block::default()
      .title(format!(" {} [key {}] ", self.consumer.title(), self.shown_key))
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    match &self.view {
      BoundaryView::Loading => {
        let paragraph = Paragraph::new("LOADING").style(Style::default().fg(Color::DarkGray));
        frame.render_widget(paragraph, inner);
      }
      BoundaryView::Ready { output, .. } => self.consumer.render(output, frame, inner),
      BoundaryView::Faulted { message } => {
        let lines = vec![
          Line::styled(
            "ERROR BOUNDARY",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
          ),
          Line::raw(message.as_str()),
          Line::raw(""),
          Line::styled("[r] RETRY", Style::default().fg(Color::Yellow)),
        ];
        let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
        frame.render_widget(paragraph, inner);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ResultCache;
  use crate::network::MockNetwork;
  use crate::recovery::{FetchKeyState, InvalidationScope};
  use crate::ui::render_to_string;
  use crate::ui::views::{accounts_operation, AccountsView};
  use serde_json::json;

  struct Fixture {
    boundary: Boundary<AccountsView>,
    network: MockNetwork,
    cache: ResultCache,
  }

  fn fixture() -> Fixture {
    let network = MockNetwork::new();
    let cache = ResultCache::in_memory();
    let coordinator = FetchCoordinator::new(cache.clone(), Arc::new(network.clone()));
    let recovery = Arc::new(RecoveryController::new(
      cache.clone(),
      FetchKeyState::default(),
      InvalidationScope::All,
    ));
    let boundary = Boundary::new(AccountsView, accounts_operation(), coordinator, recovery);
    Fixture {
      boundary,
      network,
      cache,
    }
  }

  fn screen(boundary: &Boundary<AccountsView>) -> String {
    render_to_string(50, 10, |frame| {
      let area = frame.area();
      boundary.render(frame, area);
    })
    .unwrap()
  }

  fn with_null_node() -> Value {
    json!({ "viewer": { "accounts": { "edges": [
      { "node": { "uuid": 1 } },
      { "node": null }
    ] } } })
  }

  fn complete() -> Value {
    json!({ "viewer": { "accounts": { "edges": [
      { "node": { "uuid": 1 } },
      { "node": { "uuid": 2 } }
    ] } } })
  }

  /// Evaluate until the pending request has been delivered.
  async fn settle(boundary: &mut Boundary<AccountsView>) {
    for _ in 0..100 {
      boundary.evaluate().unwrap();
      if !boundary.view().is_loading() {
        return;
      }
      tokio::task::yield_now().await;
    }
    panic!("boundary stayed loading");
  }

  #[tokio::test]
  async fn test_recovers_from_null_node_with_fresh_data() {
    let Fixture {
      mut boundary,
      network,
      cache,
    } = fixture();

    boundary.evaluate().unwrap();
    assert!(boundary.view().is_loading());
    assert!(screen(&boundary).contains("LOADING"));
    assert_eq!(network.request_count(), 1);

    network.resolve_most_recent(with_null_node());
    settle(&mut boundary).await;

    assert!(boundary.view().is_faulted());
    let faulted = screen(&boundary);
    assert!(faulted.contains("ERROR BOUNDARY"));
    assert!(faulted.contains("RETRY"));
    // The faulting payload is cached as valid data.
    let identity = accounts_operation().identity();
    assert!(cache.get(&identity, FetchKey::INITIAL).unwrap().is_some());

    let outcome = boundary.retry().unwrap();
    assert_eq!(
      outcome,
      RecoveryOutcome::Refetch {
        previous: FetchKey::new(0),
        key: FetchKey::new(1)
      }
    );
    assert!(cache.entry(&identity, FetchKey::INITIAL).unwrap().unwrap().stale);

    // A new fetch is pending under the new key, and nothing stale is shown.
    assert!(boundary.view().is_loading());
    let pending = network.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].fetch_key, FetchKey::new(1));
    assert_eq!(network.request_count(), 2);

    network.resolve_most_recent(complete());
    settle(&mut boundary).await;

    assert_eq!(
      boundary.view().output(),
      Some(&vec!["1".to_string(), "2".to_string()])
    );
    let recovered = screen(&boundary);
    assert!(recovered.contains("Accounts:"));
    let rows: Vec<&str> = recovered
      .lines()
      .map(|l| l.trim_matches(|c: char| c == '│' || c.is_whitespace()))
      .collect();
    assert!(rows.contains(&"1"));
    assert!(rows.contains(&"2"));
    assert!(!recovered.contains("ERROR BOUNDARY"));
    assert!(!recovered.contains("LOADING"));
  }

  #[tokio::test]
  async fn test_dismiss_without_recovery_faults_again_from_cache() {
    let Fixture {
      mut boundary,
      network,
      ..
    } = fixture();

    boundary.evaluate().unwrap();
    network.resolve_most_recent(with_null_node());
    settle(&mut boundary).await;
    assert!(boundary.view().is_faulted());

    // Remounting under the same key reads the same cached payload.
    assert!(boundary.dismiss().unwrap());
    assert!(boundary.view().is_faulted());
    assert_eq!(boundary.fetch_key(), FetchKey::INITIAL);
    assert_eq!(network.request_count(), 1);
  }

  #[tokio::test]
  async fn test_transport_fault_retries_same_key() {
    let Fixture {
      mut boundary,
      network,
      ..
    } = fixture();

    boundary.evaluate().unwrap();
    network.reject_most_recent("connection reset");
    settle(&mut boundary).await;

    assert!(boundary.view().is_faulted());
    assert!(screen(&boundary).contains("connection reset"));

    let outcome = boundary.retry().unwrap();
    assert_eq!(outcome, RecoveryOutcome::RetrySameKey { key: FetchKey::INITIAL });
    assert_eq!(network.request_count(), 2);
    assert_eq!(network.pending_operations()[0].fetch_key, FetchKey::INITIAL);

    network.resolve_most_recent(complete());
    settle(&mut boundary).await;
    assert!(boundary.view().is_ready());
  }

  #[tokio::test]
  async fn test_ready_view_is_served_from_cache() {
    let Fixture {
      mut boundary,
      network,
      cache,
    } = fixture();

    cache
      .put(
        &accounts_operation().identity(),
        FetchKey::INITIAL,
        &Arc::new(complete()),
      )
      .unwrap();

    assert!(boundary.evaluate().unwrap());
    assert!(boundary.view().is_ready());
    assert!(!boundary.evaluate().unwrap());
    assert_eq!(network.request_count(), 0);
  }

  #[tokio::test]
  async fn test_title_shows_key_of_rendered_view() {
    let Fixture {
      mut boundary,
      network,
      ..
    } = fixture();

    boundary.evaluate().unwrap();
    network.resolve_most_recent(complete());
    settle(&mut boundary).await;
    assert!(screen(&boundary).contains("[key 0]"));

    // The key moved but the view has not been re-derived yet.
    boundary.recovery().fetch_key().advance();
    let stale = screen(&boundary);
    assert!(stale.contains("[key 0]"));
    assert!(stale.contains("Accounts:"));

    boundary.evaluate().unwrap();
    assert_eq!(boundary.shown_key(), FetchKey::new(1));
    let loading = screen(&boundary);
    assert!(loading.contains("[key 1]"));
    assert!(loading.contains("LOADING"));
  }

  #[tokio::test]
  async fn test_key_advance_during_fetch_drops_old_request() {
    let Fixture {
      mut boundary,
      network,
      ..
    } = fixture();

    boundary.evaluate().unwrap();
    boundary.recovery().fetch_key().advance();
    boundary.evaluate().unwrap();

    assert_eq!(network.request_count(), 2);
    // Answer the newer request; the key-0 one stays pending.
    network.resolve_most_recent(complete());
    settle(&mut boundary).await;

    match boundary.view() {
      BoundaryView::Ready { key, .. } => assert_eq!(*key, FetchKey::new(1)),
      other => panic!("expected ready, got {:?}", other),
    }
  }
}
