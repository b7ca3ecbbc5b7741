//! Process-wide freshness cache.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Serves fresh entries from memory without touching the network
//! - Serves stale entries immediately while revalidating in the background
//! - Deduplicates concurrent fetches of the same key into one producer call
//! - Never caches failures

mod clock;
mod layer;
mod traits;

use serde_json::Value;
use std::sync::{Arc, OnceLock};

pub use clock::{Clock, ManualClock, SystemClock};
pub use layer::FreshnessCache;
pub use traits::{CachePolicy, Freshness};

/// Cache of raw API payloads shared by every list overlay in the process.
pub type PayloadCache = FreshnessCache<Value>;

static GLOBAL: OnceLock<PayloadCache> = OnceLock::new();

/// Initialise the process-wide cache with a specific clock.
///
/// Returns `false` if it was already initialised, in which case the existing
/// instance is kept.
pub fn init_global(clock: Arc<dyn Clock>) -> bool {
  GLOBAL.set(PayloadCache::with_clock(clock)).is_ok()
}

/// The process-wide cache, created with the wall clock on first use.
pub fn global() -> &'static PayloadCache {
  GLOBAL.get_or_init(PayloadCache::new)
}
