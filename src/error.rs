//! Error taxonomy for the sync layer.

use crate::api::ActionVerb;

/// Errors surfaced by the cache, the transport and the list overlay.
///
/// `Clone` so that one failed producer call can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
  /// Network or HTTP failure. `status` is set when the server answered.
  #[error("transport error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
  Transport { status: Option<u16>, message: String },

  /// Payload matched none of the known list envelopes.
  #[error("unrecognised payload shape: {0}")]
  Shape(String),

  /// A call was attempted without what it needs (auth token, valid key).
  #[error("precondition failed: {0}")]
  Precondition(String),

  /// The same action is already running for this item.
  #[error("{verb} already in progress for {item_id}")]
  ActionConflict { item_id: String, verb: ActionVerb },
}

impl SyncError {
  pub fn transport(message: impl Into<String>) -> Self {
    Self::Transport {
      status: None,
      message: message.into(),
    }
  }

  pub fn http(status: u16, message: impl Into<String>) -> Self {
    Self::Transport {
      status: Some(status),
      message: message.into(),
    }
  }

  /// Whether showing a retry affordance makes sense for this error.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Transport { .. } | Self::Precondition(_))
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(e: reqwest::Error) -> Self {
    Self::Transport {
      status: e.status().map(|s| s.as_u16()),
      message: e.to_string(),
    }
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
