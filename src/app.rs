use crate::event::{Event, EventHandler};
use color_eyre::{eyre::eyre, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use refetch::cache::ResultCache;
use refetch::config::Config;
use refetch::fetch::FetchCoordinator;
use refetch::network::ScriptedNetwork;
use refetch::recovery::{FetchKeyState, RecoveryController};
use refetch::ui::{self, views, Boundary, BoundaryView};
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const TICK_RATE: Duration = Duration::from_millis(100);

/// Main application state
pub struct App {
  boundary: Boundary<views::AccountsView>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(config: &Config) -> Result<Self> {
    let cache = ResultCache::from_config(&config.cache)?;
    let network = ScriptedNetwork::new(config.network.responses.clone(), config.network.latency());
    let coordinator = FetchCoordinator::new(cache.clone(), Arc::new(network));
    let recovery = Arc::new(RecoveryController::new(
      cache,
      FetchKeyState::default(),
      config.recovery.invalidation,
    ));

    let boundary = Boundary::new(
      views::AccountsView,
      views::accounts_operation(),
      coordinator,
      recovery,
    );

    Ok(Self {
      boundary,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = self.event_loop(&mut terminal).await;

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop(
    &mut self,
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
  ) -> Result<()> {
    let mut events = EventHandler::new(TICK_RATE);

    // Initial mount
    self.boundary.evaluate()?;

    // Main loop
    while !self.should_quit {
      // Draw UI
      terminal.draw(|frame| ui::draw(frame, &self.boundary))?;

      // Handle events
      match events.next().await {
        Some(event) => self.handle_event(event)?,
        None => break,
      }
    }

    Ok(())
  }

  /// Replay the scenario without a terminal: mount, retry on faults, and
  /// print every distinct frame until the consumer renders.
  pub async fn run_headless(&mut self, max_retries: usize) -> Result<()> {
    let mut retries = 0;
    let mut last_frame = String::new();

    loop {
      self.boundary.evaluate()?;

      let frame = ui::render_to_string(60, 10, |frame| ui::draw(frame, &self.boundary))?;
      if frame != last_frame {
        println!("{}\n", frame);
        last_frame = frame;
      }

      match self.boundary.view() {
        BoundaryView::Ready { .. } => return Ok(()),
        BoundaryView::Loading => tokio::time::sleep(TICK_RATE).await,
        BoundaryView::Faulted { message } => {
          if retries >= max_retries {
            return Err(eyre!("Gave up after {} retries: {}", retries, message));
          }
          retries += 1;
          let outcome = self.boundary.retry()?;
          info!(?outcome, retries, "headless retry");
        }
      }
    }
  }

  fn handle_event(&mut self, event: Event) -> Result<()> {
    match event {
      Event::Key(key) => self.handle_key(key)?,
      Event::Tick => {
        self.boundary.evaluate()?;
      }
    }
    Ok(())
  }

  fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }
      KeyCode::Char('r') if self.boundary.view().is_faulted() => {
        let outcome = self.boundary.retry()?;
        info!(?outcome, "retry requested");
      }
      KeyCode::Char('d') if self.boundary.view().is_faulted() => {
        self.boundary.dismiss()?;
      }
      _ => {}
    }
    Ok(())
  }
}
