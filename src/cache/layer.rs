//! In-memory freshness cache with stale-while-revalidate and fetch deduplication.

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::traits::{CachePolicy, Freshness};
use crate::error::{Result, SyncError};

type ComputationChannel<V> = Shared<oneshot::Receiver<Result<V>>>;

/// A successfully fetched value and when it was fetched.
struct Stored<V> {
  value: V,
  fetched_at: Instant,
}

/// A producer call that is still running, shared by everyone who asked for it.
struct InFlight<V> {
  id: u64,
  channel: ComputationChannel<V>,
}

struct Entry<V> {
  stored: Option<Stored<V>>,
  in_flight: Option<InFlight<V>>,
}

impl<V> Default for Entry<V> {
  fn default() -> Self {
    Self {
      stored: None,
      in_flight: None,
    }
  }
}

struct Inner<V> {
  entries: Mutex<HashMap<String, Entry<V>>>,
  clock: Arc<dyn Clock>,
  next_computation: AtomicU64,
}

/// Key to value cache with two freshness thresholds per lookup.
///
/// - Fresh entries are returned without calling the producer.
/// - Stale entries are returned immediately and revalidated in the background.
/// - Missing or expired entries are fetched before returning.
///
/// At most one producer call per key runs at any time. Callers that arrive
/// while one is running wait on the same result, success or error.
///
/// Values are cloned out on every read; the cache keeps its own copy.
pub struct FreshnessCache<V> {
  inner: Arc<Inner<V>>,
}

impl<V> Clone for FreshnessCache<V> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<V> FreshnessCache<V>
where
  V: Clone + Send + Sync + 'static,
{
  /// Create a cache driven by the wall clock.
  pub fn new() -> Self {
    Self::with_clock(Arc::new(SystemClock))
  }

  /// Create a cache driven by the given clock.
  pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        clock,
        next_computation: AtomicU64::new(0),
      }),
    }
  }

  /// Get the value for `key`, calling `producer` only when needed.
  ///
  /// Producer failures are returned to every caller waiting on that call and
  /// are never cached. Failures of a background revalidation are logged and
  /// leave the stale entry in place.
  pub async fn get<F, Fut>(&self, key: &str, producer: F, policy: CachePolicy) -> Result<V>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
  {
    validate_key(key)?;

    let channel = {
      let now = self.inner.clock.now();
      let mut entries = self.inner.entries.lock();
      let entry = entries.entry(key.to_owned()).or_default();

      if let Some(stored) = &entry.stored {
        let age = now.saturating_duration_since(stored.fetched_at);
        match policy.classify(age) {
          Freshness::Fresh => {
            debug!("cache hit for {}", key);
            return Ok(stored.value.clone());
          }
          Freshness::Stale => {
            let value = stored.value.clone();
            if entry.in_flight.is_none() {
              debug!("serving stale {} and revalidating", key);
              // Spawned eagerly; nobody needs to hold the channel.
              let _revalidation = self.spawn_computation(key, entry, producer, true);
            }
            return Ok(value);
          }
          Freshness::Expired => debug!("cache entry {} expired", key),
        }
      }

      match &entry.in_flight {
        Some(in_flight) => {
          debug!("joining in-flight fetch for {}", key);
          in_flight.channel.clone()
        }
        None => {
          debug!("cache miss for {}", key);
          self.spawn_computation(key, entry, producer, false)
        }
      }
    };

    match channel.await {
      Ok(result) => result,
      Err(_cancelled) => Err(SyncError::transport(format!(
        "fetch for {key} was dropped before completing"
      ))),
    }
  }

  /// Warm the cache for `key`. The value is discarded and errors are only logged.
  pub async fn prefetch<F, Fut>(&self, key: &str, producer: F, policy: CachePolicy)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
  {
    if let Err(e) = self.get(key, producer, policy).await {
      debug!("prefetch of {} failed: {}", key, e);
    }
  }

  /// Remove the entry for `key`.
  ///
  /// A producer call still running for it is detached: its callers get its
  /// result, but the result is not stored.
  pub fn invalidate(&self, key: &str) -> bool {
    let removed = self.inner.entries.lock().remove(key).is_some();
    if removed {
      debug!("invalidated {}", key);
    }
    removed
  }

  /// Remove every entry whose key satisfies `predicate`. Returns how many went.
  pub fn invalidate_by_pattern<P>(&self, predicate: P) -> usize
  where
    P: Fn(&str) -> bool,
  {
    let mut entries = self.inner.entries.lock();
    let before = entries.len();
    entries.retain(|key, _| !predicate(key));
    let removed = before - entries.len();
    if removed > 0 {
      debug!("invalidated {} entries by pattern", removed);
    }
    removed
  }

  /// Whether a value is stored for `key`, regardless of its age.
  pub fn contains(&self, key: &str) -> bool {
    self
      .inner
      .entries
      .lock()
      .get(key)
      .is_some_and(|e| e.stored.is_some())
  }

  /// How the stored value for `key` classifies under `policy` right now.
  pub fn freshness(&self, key: &str, policy: CachePolicy) -> Option<Freshness> {
    let now = self.inner.clock.now();
    let entries = self.inner.entries.lock();
    let stored = entries.get(key)?.stored.as_ref()?;
    Some(policy.classify(now.saturating_duration_since(stored.fetched_at)))
  }

  /// Number of keys with a stored value.
  pub fn len(&self) -> usize {
    self
      .inner
      .entries
      .lock()
      .values()
      .filter(|e| e.stored.is_some())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Spawn the producer and register it as the in-flight call for `key`.
  ///
  /// Not `async`: the computation starts on the runtime even if nobody awaits
  /// the returned channel.
  fn spawn_computation<F, Fut>(
    &self,
    key: &str,
    entry: &mut Entry<V>,
    producer: F,
    is_refresh: bool,
  ) -> ComputationChannel<V>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
  {
    let id = self.inner.next_computation.fetch_add(1, Ordering::Relaxed);
    let (sender, receiver) = oneshot::channel();
    let settle = SettleOnDrop {
      cache: Arc::downgrade(&self.inner),
      key: key.to_owned(),
      id,
      is_refresh,
      armed: true,
    };

    tokio::spawn(async move {
      let result = producer().await;
      // Settle the entry before waking callers, so anyone arriving after
      // the wake-up sees the stored value instead of a finished channel.
      settle.complete(&result);
      sender.send(result).ok();
    });

    let channel = receiver.shared();
    entry.in_flight = Some(InFlight {
      id,
      channel: channel.clone(),
    });
    channel
  }
}

impl<V> Default for FreshnessCache<V>
where
  V: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<V> std::fmt::Debug for FreshnessCache<V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FreshnessCache")
      .field("keys", &self.inner.entries.lock().len())
      .finish_non_exhaustive()
  }
}

fn validate_key(key: &str) -> Result<()> {
  if key.is_empty() {
    return Err(SyncError::Precondition("cache key must not be empty".into()));
  }
  Ok(())
}

/// Clears the in-flight marker of one computation, even if its task never
/// finishes (panic, runtime shutdown).
struct SettleOnDrop<V> {
  cache: Weak<Inner<V>>,
  key: String,
  id: u64,
  is_refresh: bool,
  armed: bool,
}

impl<V: Clone> SettleOnDrop<V> {
  fn complete(mut self, result: &Result<V>) {
    self.armed = false;
    let Some(cache) = self.cache.upgrade() else {
      return;
    };
    let now = cache.clock.now();
    let mut entries = cache.entries.lock();
    let Some(entry) = entries.get_mut(&self.key) else {
      debug!("{} was invalidated while fetching, dropping result", self.key);
      return;
    };
    if entry.in_flight.as_ref().map(|f| f.id) != Some(self.id) {
      debug!("{} was replaced while fetching, dropping result", self.key);
      return;
    }

    entry.in_flight = None;
    match result {
      Ok(value) => {
        entry.stored = Some(Stored {
          value: value.clone(),
          fetched_at: now,
        });
      }
      Err(e) if self.is_refresh => {
        warn!("background revalidation of {} failed: {}", self.key, e);
      }
      Err(_) => entry.stored = None,
    }

    if entry.stored.is_none() {
      entries.remove(&self.key);
    }
  }
}

impl<V> Drop for SettleOnDrop<V> {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    let Some(cache) = self.cache.upgrade() else {
      return;
    };
    let mut entries = cache.entries.lock();
    if let Some(entry) = entries.get_mut(&self.key) {
      if entry.in_flight.as_ref().map(|f| f.id) == Some(self.id) {
        entry.in_flight = None;
        if entry.stored.is_none() {
          entries.remove(&self.key);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;

  fn policy() -> CachePolicy {
    CachePolicy::from_millis(100, 500).unwrap()
  }

  /// Producer factory that counts calls and yields `value` after `delay`.
  fn counting(
    calls: &Arc<AtomicUsize>,
    value: u32,
    delay: Duration,
  ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<u32>> {
    let calls = Arc::clone(calls);
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      Box::pin(async move {
        tokio::time::sleep(delay).await;
        Ok(value)
      })
    }
  }

  fn failing(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
  ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<u32>> {
    let calls = Arc::clone(calls);
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      Box::pin(async move {
        tokio::time::sleep(delay).await;
        Err(SyncError::http(502, "bad gateway"))
      })
    }
  }

  /// Give spawned computations a chance to finish.
  async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
  }

  #[tokio::test]
  async fn test_concurrent_gets_share_one_producer_call() {
    let cache = FreshnessCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let gets = (0..8).map(|_| {
      cache.get(
        "requests",
        counting(&calls, 7, Duration::from_millis(10)),
        policy(),
      )
    });
    let results = futures::future::join_all(gets).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r == &Ok(7)));
  }

  #[tokio::test]
  async fn test_failure_reaches_every_waiter_and_is_not_cached() {
    let cache: FreshnessCache<u32> = FreshnessCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let gets = (0..3).map(|_| cache.get("k", failing(&calls, Duration::from_millis(10)), policy()));
    let results = futures::future::join_all(gets).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in &results {
      assert_eq!(result, &Err(SyncError::http(502, "bad gateway")));
    }
    assert!(!cache.contains("k"));

    // Next call retries
    let value = cache
      .get("k", counting(&calls, 3, Duration::ZERO), policy())
      .await;
    assert_eq!(value, Ok(3));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_fresh_window_serves_without_calling() {
    let clock = Arc::new(ManualClock::new());
    let cache = FreshnessCache::with_clock(clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    assert_eq!(cache.get("k", counting(&calls, 1, Duration::ZERO), policy()).await, Ok(1));
    clock.advance(Duration::from_millis(50));
    assert_eq!(cache.get("k", counting(&calls, 2, Duration::ZERO), policy()).await, Ok(1));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_window_serves_cached_and_revalidates_once() {
    let clock = Arc::new(ManualClock::new());
    let cache = FreshnessCache::with_clock(clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("k", counting(&calls, 1, Duration::ZERO), policy()).await.unwrap();
    clock.advance(Duration::from_millis(300));

    // Both callers see the old value; only one background call is made
    let first = cache.get("k", counting(&calls, 2, Duration::from_millis(5)), policy());
    let second = cache.get("k", counting(&calls, 3, Duration::from_millis(5)), policy());
    assert_eq!(first.await, Ok(1));
    assert_eq!(second.await, Ok(1));

    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.freshness("k", policy()), Some(Freshness::Fresh));
    assert_eq!(cache.get("k", counting(&calls, 4, Duration::ZERO), policy()).await, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_expired_entry_blocks_on_refetch() {
    let clock = Arc::new(ManualClock::new());
    let cache = FreshnessCache::with_clock(clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("k", counting(&calls, 1, Duration::ZERO), policy()).await.unwrap();
    clock.advance(Duration::from_millis(600));

    let value = cache.get("k", counting(&calls, 2, Duration::from_millis(5)), policy()).await;
    assert_eq!(value, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_failed_revalidation_keeps_stale_entry() {
    let clock = Arc::new(ManualClock::new());
    let cache = FreshnessCache::with_clock(clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("k", counting(&calls, 1, Duration::ZERO), policy()).await.unwrap();
    clock.advance(Duration::from_millis(300));

    assert_eq!(cache.get("k", failing(&calls, Duration::ZERO), policy()).await, Ok(1));
    settle().await;

    assert!(cache.contains("k"));
    assert_eq!(cache.freshness("k", policy()), Some(Freshness::Stale));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_invalidate_forces_next_get_to_fetch() {
    let clock = Arc::new(ManualClock::new());
    let cache = FreshnessCache::with_clock(clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("k", counting(&calls, 1, Duration::ZERO), policy()).await.unwrap();
    assert!(cache.invalidate("k"));
    clock.advance(Duration::from_millis(1));

    assert_eq!(cache.get("k", counting(&calls, 2, Duration::ZERO), policy()).await, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_invalidate_detaches_running_fetch() {
    let cache = FreshnessCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let slow = {
      let cache = cache.clone();
      let producer = counting(&calls, 1, Duration::from_millis(20));
      tokio::spawn(async move { cache.get("k", producer, policy()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    cache.invalidate("k");

    // The old caller still gets its answer, but it is not stored
    assert_eq!(slow.await.unwrap(), Ok(1));
    assert!(!cache.contains("k"));
    assert_eq!(cache.get("k", counting(&calls, 2, Duration::ZERO), policy()).await, Ok(2));
  }

  #[tokio::test]
  async fn test_invalidate_by_pattern() {
    let cache = FreshnessCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    for key in ["products:list:a", "products:list:b", "orders:list:a"] {
      cache.get(key, counting(&calls, 1, Duration::ZERO), policy()).await.unwrap();
    }

    let removed = cache.invalidate_by_pattern(|k| k.starts_with("products:"));

    assert_eq!(removed, 2);
    assert_eq!(cache.len(), 1);
    assert!(cache.contains("orders:list:a"));
  }

  #[tokio::test]
  async fn test_prefetch_warms_and_swallows_errors() {
    let cache = FreshnessCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    cache.prefetch("bad", failing(&calls, Duration::ZERO), policy()).await;
    assert!(!cache.contains("bad"));

    cache.prefetch("good", counting(&calls, 9, Duration::ZERO), policy()).await;
    assert_eq!(cache.get("good", counting(&calls, 0, Duration::ZERO), policy()).await, Ok(9));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_empty_key_is_rejected() {
    let cache = FreshnessCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let err = cache
      .get("", counting(&calls, 1, Duration::ZERO), policy())
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Precondition(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
