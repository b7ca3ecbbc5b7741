//! Time sources for freshness decisions.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Source of "now" for the cache.
///
/// Injected so tests can move time forward without sleeping.
pub trait Clock: Send + Sync + 'static {
  fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  origin: Instant,
  offset: Mutex<Duration>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      origin: Instant::now(),
      offset: Mutex::new(Duration::ZERO),
    }
  }

  /// Move the clock forward by `by`.
  pub fn advance(&self, by: Duration) {
    *self.offset.lock() += by;
  }

  /// Time elapsed since the clock was created.
  pub fn elapsed(&self) -> Duration {
    *self.offset.lock()
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    self.origin + *self.offset.lock()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances_only_when_told() {
    let clock = ManualClock::new();
    let start = clock.now();
    assert_eq!(clock.now(), start);

    clock.advance(Duration::from_millis(250));
    assert_eq!(clock.now() - start, Duration::from_millis(250));
    assert_eq!(clock.elapsed(), Duration::from_millis(250));
  }
}
