use crate::fault::Fault;
use crate::operation::Operation;
use crate::ui::view::Consumer;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;
use serde_json::Value;

pub const ACCOUNTS_QUERY: &str = r#"
query AccountsQuery {
  viewer {
    accounts {
      edges {
        node {
          uuid
        }
      }
    }
  }
}
"#;

pub fn accounts_operation() -> Operation {
  Operation::new("AccountsQuery", ACCOUNTS_QUERY)
}

/// Lists the viewer's account ids.
///
/// `viewer`, `accounts` and `edges` are optional; every edge must carry a node.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountsView;

impl Consumer for AccountsView {
  type Output = Vec<String>;

  fn consume(&self, payload: &Value) -> Result<Vec<String>, Fault> {
    let edges = payload
      .get("viewer")
      .and_then(|viewer| viewer.get("accounts"))
      .and_then(|accounts| accounts.get("edges"))
      .and_then(Value::as_array);

    let Some(edges) = edges else {
      return Ok(Vec::new());
    };

    edges
      .iter()
      .enumerate()
      .map(|(i, edge)| -> Result<String, Fault> {
        let path = format!("viewer.accounts.edges[{}].node", i);
        let node = present(edge.get("node"))
          .ok_or_else(|| Fault::consumption(&path, "cannot read 'uuid' of a null account node"))?;
        let uuid = present(node.get("uuid"))
          .ok_or_else(|| Fault::consumption(format!("{}.uuid", path), "account node has no uuid"))?;
        Ok(match uuid {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        })
      })
      .collect()
  }

  fn render(&self, output: &Vec<String>, frame: &mut Frame, area: Rect) {
    let mut lines = vec![Line::styled(
      "Accounts:",
      Style::default().add_modifier(Modifier::BOLD),
    )];
    lines.extend(
      output
        .iter()
        .map(|uuid| Line::styled(uuid.as_str(), Style::default().fg(Color::Cyan))),
    );

    frame.render_widget(Paragraph::new(lines), area);
  }

  fn title(&self) -> String {
    "Accounts".to_string()
  }
}

/// Absent and null both count as missing.
fn present(value: Option<&Value>) -> Option<&Value> {
  value.filter(|v| !v.is_null())
}
