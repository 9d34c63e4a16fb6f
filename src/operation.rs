//! Query descriptions, their normalized identity, and fetch keys.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Caller-owned version token. Combined with a [`QueryIdentity`] it addresses
/// one cache slot; advancing it points the next resolve at an empty slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchKey(u64);

impl FetchKey {
  pub const INITIAL: FetchKey = FetchKey(0);

  pub const fn new(value: u64) -> Self {
    Self(value)
  }

  pub const fn value(self) -> u64 {
    self.0
  }

  /// The key a recovery advances to.
  pub const fn next(self) -> Self {
    Self(self.0.saturating_add(1))
  }
}

impl fmt::Display for FetchKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A query as handed to the fetch coordinator: name, document and variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
  name: String,
  document: String,
  variables: Value,
}

impl Operation {
  pub fn new(name: impl Into<String>, document: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      document: document.into(),
      variables: Value::Object(Default::default()),
    }
  }

  pub fn with_variables(mut self, variables: Value) -> Self {
    self.variables = variables;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn document(&self) -> &str {
    &self.document
  }

  pub fn variables(&self) -> &Value {
    &self.variables
  }

  /// Normalized identity of this query, independent of any fetch key.
  pub fn identity(&self) -> QueryIdentity {
    let input = format!(
      "{}\n{}\n{}",
      self.name,
      normalize_document(&self.document),
      // serde_json maps are BTreeMaps without `preserve_order`, so keys come out sorted
      self.variables
    );

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hex::encode(hasher.finalize());

    QueryIdentity {
      name: self.name.clone(),
      hash,
    }
  }
}

/// Normalized shape + parameters of a query. Two operations that differ only
/// in whitespace or variable ordering share an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryIdentity {
  name: String,
  hash: String,
}

impl QueryIdentity {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Hex SHA-256 of the normalized query, used as the storage key.
  pub fn hash(&self) -> &str {
    &self.hash
  }

  /// Short form for log lines.
  pub fn short(&self) -> String {
    format!("{}#{}", self.name, &self.hash[..8.min(self.hash.len())])
  }
}

impl fmt::Display for QueryIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.short())
  }
}

/// Collapse runs of whitespace so formatting changes don't split the cache.
fn normalize_document(document: &str) -> String {
  document.split_whitespace().collect::<Vec<_>>().join(" ")
}
