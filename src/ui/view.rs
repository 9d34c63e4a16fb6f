use ratatui::prelude::*;
use serde_json::Value;

use crate::fault::Fault;

/// A component that reads a query payload and draws it.
///
/// `consume` walks the payload into the shape the component expects and
/// returns a consumption fault when the payload doesn't fit. A `Boundary`
/// catches that fault; `render` is only ever called with a successful output.
pub trait Consumer {
  type Output;

  /// Traverse a payload into renderable output.
  fn consume(&self, payload: &Value) -> Result<Self::Output, Fault>;

  /// Render the output to the frame
  fn render(&self, output: &Self::Output, frame: &mut Frame, area: Rect);

  /// Title shown on the surrounding block
  fn title(&self) -> String;
}
