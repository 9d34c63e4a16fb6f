mod boundary;
mod view;
pub mod views;

pub use boundary::{Boundary, BoundaryView};
pub use view::Consumer;

use color_eyre::Result;
use ratatui::backend::TestBackend;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;
use tracing::warn;

/// Draw a boundary with a status bar underneath.
pub fn draw<C: Consumer>(frame: &mut Frame, boundary: &Boundary<C>) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  boundary.render(frame, chunks[0]);
  draw_status_bar(frame, chunks[1], boundary);
}

fn draw_status_bar<C: Consumer>(frame: &mut Frame, area: Rect, boundary: &Boundary<C>) {
  let cached = match boundary.coordinator().cache().len() {
    Ok(count) => count.to_string(),
    Err(e) => {
      warn!(error = %e, "failed to count cache entries");
      "?".to_string()
    }
  };
  let in_flight = boundary.coordinator().in_flight_count();

  let hint = if boundary.view().is_faulted() {
    " r:retry  d:dismiss  q:quit"
  } else {
    " q:quit"
  };
  let content = format!(
    "{}   key:{} cached:{} in-flight:{}",
    hint,
    boundary.shown_key(),
    cached,
    in_flight
  );

  let paragraph = Paragraph::new(content).style(Style::default().fg(Color::DarkGray));
  frame.render_widget(paragraph, area);
}

/// Draw into an off-screen buffer and return its text, one line per row.
pub fn render_to_string<F>(width: u16, height: u16, draw: F) -> Result<String>
where
  F: FnOnce(&mut Frame),
{
  let mut terminal = Terminal::new(TestBackend::new(width, height))?;
  terminal.draw(draw)?;

  let buffer = terminal.backend().buffer();
  let width = usize::from(buffer.area.width.max(1));
  let lines: Vec<String> = buffer
    .content()
    .chunks(width)
    .map(|row| {
      row
        .iter()
        .map(|cell| cell.symbol())
        .collect::<String>()
        .trim_end()
        .to_string()
    })
    .collect();

  Ok(lines.join("\n"))
}
