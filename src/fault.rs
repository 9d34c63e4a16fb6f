//! Faults surfaced to a recovery boundary.

use std::fmt;

/// A fault raised while fetching or consuming a query result.
///
/// The two classes recover differently: a transport fault is retried under the
/// same fetch key, a consumption fault needs invalidation plus a new key since
/// a same-key retry would re-read the payload that faulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
  /// The network request itself failed.
  Transport { message: String },
  /// The payload arrived but the consumer could not traverse it.
  Consumption { path: String, message: String },
}

impl Fault {
  pub fn transport(message: impl Into<String>) -> Self {
    Fault::Transport {
      message: message.into(),
    }
  }

  pub fn consumption(path: impl Into<String>, message: impl Into<String>) -> Self {
    Fault::Consumption {
      path: path.into(),
      message: message.into(),
    }
  }

  pub fn is_transport(&self) -> bool {
    matches!(self, Fault::Transport { .. })
  }

  pub fn is_consumption(&self) -> bool {
    matches!(self, Fault::Consumption { .. })
  }

  /// Human-readable message shown by the boundary.
  pub fn message(&self) -> String {
    self.to_string()
  }
}

impl fmt::Display for Fault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Fault::Transport { message } => write!(f, "request failed: {}", message),
      Fault::Consumption { path, message } => write!(f, "{} (at {})", message, path),
    }
  }
}

impl std::error::Error for Fault {}
