//! Freshness policy and the classification of cached entries against it.

use std::time::Duration;

use crate::error::{Result, SyncError};

/// Two age thresholds relative to when an entry was fetched.
///
/// Up to `stale_after` the entry is served as-is. Between the two it is
/// served and revalidated in the background. Past `expires_after` it must be
/// refetched before it can be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
  stale_after: Duration,
  expires_after: Duration,
}

impl CachePolicy {
  /// Create a policy. Fails if `stale_after` exceeds `expires_after`.
  pub fn new(stale_after: Duration, expires_after: Duration) -> Result<Self> {
    if stale_after > expires_after {
      return Err(SyncError::Precondition(format!(
        "stale_after ({stale_after:?}) must not exceed expires_after ({expires_after:?})"
      )));
    }
    Ok(Self {
      stale_after,
      expires_after,
    })
  }

  pub fn from_millis(stale_after: u64, expires_after: u64) -> Result<Self> {
    Self::new(
      Duration::from_millis(stale_after),
      Duration::from_millis(expires_after),
    )
  }

  pub fn stale_after(&self) -> Duration {
    self.stale_after
  }

  pub fn expires_after(&self) -> Duration {
    self.expires_after
  }

  /// Classify an entry of the given age.
  pub fn classify(&self, age: Duration) -> Freshness {
    if age <= self.stale_after {
      Freshness::Fresh
    } else if age <= self.expires_after {
      Freshness::Stale
    } else {
      Freshness::Expired
    }
  }
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self {
      stale_after: Duration::from_secs(30),
      expires_after: Duration::from_secs(300),
    }
  }
}

/// Where a cached entry sits relative to its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Served directly
  Fresh,
  /// Served, and revalidated in the background
  Stale,
  /// Must be refetched before it can be served
  Expired,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rejects_inverted_thresholds() {
    let err = CachePolicy::from_millis(500, 100).unwrap_err();
    assert!(matches!(err, SyncError::Precondition(_)));
  }

  #[test]
  fn test_classify_boundaries_are_inclusive() {
    let policy = CachePolicy::from_millis(100, 500).unwrap();
    assert_eq!(policy.classify(Duration::ZERO), Freshness::Fresh);
    assert_eq!(policy.classify(Duration::from_millis(100)), Freshness::Fresh);
    assert_eq!(policy.classify(Duration::from_millis(101)), Freshness::Stale);
    assert_eq!(policy.classify(Duration::from_millis(500)), Freshness::Stale);
    assert_eq!(policy.classify(Duration::from_millis(501)), Freshness::Expired);
  }

  #[test]
  fn test_zero_policy_expires_after_first_tick() {
    let policy = CachePolicy::from_millis(0, 0).unwrap();
    assert_eq!(policy.classify(Duration::ZERO), Freshness::Fresh);
    assert_eq!(policy.classify(Duration::from_millis(1)), Freshness::Expired);
  }
}
