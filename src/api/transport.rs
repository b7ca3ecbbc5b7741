//! The seam between the sync layer and the REST surface.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use super::keys::CollectionQuery;
use crate::error::{Result, SyncError};
use crate::payload::ItemId;

/// Write actions available on list items
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum ActionVerb {
  Approve,
  Cancel,
  Delete,
}

impl ActionVerb {
  pub fn as_str(&self) -> &'static str {
    match self {
      ActionVerb::Approve => "approve",
      ActionVerb::Cancel => "cancel",
      ActionVerb::Delete => "delete",
    }
  }

  /// Status the item should show once the action has gone through.
  /// `None` for delete, which removes the item instead.
  pub fn target_status(&self) -> Option<&'static str> {
    match self {
      ActionVerb::Approve => Some("approved"),
      ActionVerb::Cancel => Some("cancelled"),
      ActionVerb::Delete => None,
    }
  }
}

impl fmt::Display for ActionVerb {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Fetches collections and performs write actions against the API.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
  /// Fetch the raw payload for a collection read.
  async fn fetch(&self, query: &CollectionQuery) -> Result<Value>;

  /// Perform `verb` on item `id` of `resource`.
  async fn mutate(&self, resource: &str, id: &ItemId, verb: ActionVerb) -> Result<()>;
}

/// Where the bearer token comes from.
pub trait TokenSource: Send + Sync + 'static {
  fn token(&self) -> Option<String>;

  /// The token, or a precondition error when there is no session.
  fn bearer(&self) -> Result<String> {
    self
      .token()
      .filter(|t| !t.trim().is_empty())
      .ok_or_else(|| SyncError::Precondition("no session token available".into()))
  }
}

/// Token read from an environment variable on every request.
#[derive(Debug, Clone)]
pub struct EnvToken {
  var: String,
}

impl EnvToken {
  pub fn new(var: impl Into<String>) -> Self {
    Self { var: var.into() }
  }
}

impl TokenSource for EnvToken {
  fn token(&self) -> Option<String> {
    std::env::var(&self.var).ok()
  }

  fn bearer(&self) -> Result<String> {
    self
      .token()
      .filter(|t| !t.trim().is_empty())
      .ok_or_else(|| SyncError::Precondition(format!("session token not found, set {}", self.var)))
  }
}

/// Fixed token, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl TokenSource for StaticToken {
  fn token(&self) -> Option<String> {
    self.0.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_target_status() {
    assert_eq!(ActionVerb::Approve.target_status(), Some("approved"));
    assert_eq!(ActionVerb::Cancel.target_status(), Some("cancelled"));
    assert_eq!(ActionVerb::Delete.target_status(), None);
  }

  #[test]
  fn test_missing_or_blank_token_is_precondition() {
    assert!(matches!(
      StaticToken(None).bearer(),
      Err(SyncError::Precondition(_))
    ));
    assert!(matches!(
      StaticToken(Some("  ".into())).bearer(),
      Err(SyncError::Precondition(_))
    ));
    assert_eq!(StaticToken(Some("abc".into())).bearer(), Ok("abc".to_string()));
  }

  #[test]
  fn test_env_token_names_variable_when_missing() {
    let source = EnvToken::new("ADMIN_SYNC_TEST_TOKEN_THAT_IS_NEVER_SET");
    let err = source.bearer().unwrap_err();
    assert!(err.to_string().contains("ADMIN_SYNC_TEST_TOKEN_THAT_IS_NEVER_SET"));
  }
}
