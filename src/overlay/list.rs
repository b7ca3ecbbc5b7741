//! Per-collection controller: cached loads, optimistic write actions and
//! reconciliation with the server.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::filters::{filter_and_sort, paginate, ListFilters, Page, Pagination};
use super::overrides::{Overrides, Tombstones};
use crate::api::{ActionVerb, CollectionQuery, Transport};
use crate::cache::{self, CachePolicy, PayloadCache};
use crate::config::OverlayConfig;
use crate::error::{Result, SyncError};
use crate::payload::{normalize, remove_item, set_status, ItemId, NormalizedItem};

/// Tuning for one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
  pub policy: CachePolicy,
  /// Delay before refetching after a write, so the backend can settle
  pub refetch_delay: Duration,
  /// Quiet period before a typed search is sent
  pub search_debounce: Duration,
  pub page_size: usize,
}

impl ListOptions {
  pub fn from_config(policy: CachePolicy, overlay: &OverlayConfig) -> Self {
    Self {
      policy,
      refetch_delay: overlay.refetch_delay(),
      search_debounce: overlay.search_debounce(),
      page_size: overlay.page_size,
    }
  }
}

impl Default for ListOptions {
  fn default() -> Self {
    Self::from_config(CachePolicy::default(), &OverlayConfig::default())
  }
}

/// An action currently running against the server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionMarker {
  Item { id: ItemId, verb: ActionVerb },
  Bulk,
}

/// What happened to a requested action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
  /// The server accepted it and the list shows the result
  Applied,
  /// The same action was already running; this request was dropped
  Ignored,
}

/// Per-item results of a bulk action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
  pub succeeded: Vec<ItemId>,
  pub failed: Vec<(ItemId, SyncError)>,
  /// Items skipped because the same action was already running for them
  pub skipped: Vec<ItemId>,
}

/// What a view renders: derived items plus request state.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot {
  pub items: Vec<NormalizedItem>,
  pub total_items: usize,
  pub total_pages: usize,
  pub page: usize,
  pub loading: bool,
  /// Last load failure; the previous items stay visible
  pub error: Option<SyncError>,
  pub action_loading: Vec<ActionMarker>,
  pub action_errors: HashMap<ItemId, SyncError>,
}

/// Derive the visible page from a raw payload and the local overlay state.
///
/// Pure: nothing passed in is modified.
pub fn derive_view(
  raw: Option<&Value>,
  overrides: &Overrides,
  tombstones: &Tombstones,
  filters: &ListFilters,
  pagination: Pagination,
) -> Page<NormalizedItem> {
  let items = raw.map(normalize).unwrap_or_default();
  let items = overrides.apply(tombstones.hide(items));
  paginate(filter_and_sort(items, filters), pagination)
}

struct State {
  raw: Option<Value>,
  filters: ListFilters,
  pagination: Pagination,
  /// Search text of the server-side query
  search: String,
  overrides: Overrides,
  tombstones: Tombstones,
  in_flight: BTreeSet<ActionMarker>,
  loading: bool,
  error: Option<SyncError>,
  action_errors: HashMap<ItemId, SyncError>,
  /// Generation of the newest load issued
  issued: u64,
  /// Loads at or below this generation were issued before the latest
  /// successful write and are discarded
  floor: u64,
  search_generation: u64,
  refetch_timer: Option<JoinHandle<()>>,
  debounce_timer: Option<JoinHandle<()>>,
  disposed: bool,
}

impl State {
  fn cancel_timers(&mut self) {
    if let Some(timer) = self.refetch_timer.take() {
      timer.abort();
    }
    if let Some(timer) = self.debounce_timer.take() {
      timer.abort();
    }
  }
}

struct Inner {
  resource: String,
  transport: Arc<dyn Transport>,
  cache: PayloadCache,
  options: ListOptions,
  state: Mutex<State>,
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.state.get_mut().cancel_timers();
  }
}

/// How a load reports failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
  /// Record the error for the view and return it
  Foreground,
  /// Log and swallow; used by the post-write refetch
  Reconcile,
}

impl Inner {
  fn query(&self, search: &str) -> CollectionQuery {
    CollectionQuery::new(self.resource.clone()).with_search(search)
  }

  /// Stamp a new load. `None` once disposed.
  fn issue_load(&self) -> Option<(u64, CollectionQuery)> {
    let mut state = self.state.lock();
    if state.disposed {
      return None;
    }
    state.issued += 1;
    state.loading = true;
    Some((state.issued, self.query(&state.search)))
  }

  async fn run_load(&self, generation: u64, query: CollectionQuery, mode: LoadMode) -> Result<()> {
    let transport = Arc::clone(&self.transport);
    let key = query.cache_key();
    let producer_query = query.clone();
    let result = self
      .cache
      .get(
        &key,
        move || async move { transport.fetch(&producer_query).await },
        self.options.policy,
      )
      .await;

    let mut state = self.state.lock();
    if state.disposed {
      debug!("list disposed, dropping load of {}", query);
      return Ok(());
    }
    if generation < state.issued || generation <= state.floor {
      debug!("discarding superseded load #{} of {}", generation, query);
      if generation == state.issued {
        state.loading = false;
      }
      return Ok(());
    }
    state.loading = false;

    match result {
      Ok(payload) => {
        let items = normalize(&payload);
        state.overrides.reconcile(&items);
        // A search result omits items that don't match, not only deleted ones
        if query.search.trim().is_empty() {
          state.tombstones.reconcile(&items);
        }
        state.raw = Some(payload);
        state.error = None;
        debug!("loaded {} ({} items)", query, items.len());
        Ok(())
      }
      Err(e) => match mode {
        LoadMode::Foreground => {
          warn!("loading {} failed: {}", query, e);
          state.error = Some(e.clone());
          Err(e)
        }
        LoadMode::Reconcile => {
          debug!("reconciliation refetch of {} failed: {}", query, e);
          Ok(())
        }
      },
    }
  }

  fn begin_action(self: &Arc<Self>, marker: ActionMarker) -> Result<ActionGuard> {
    let mut state = self.state.lock();
    if state.disposed {
      return Err(SyncError::Precondition("list has been disposed".into()));
    }
    if state.in_flight.contains(&marker) {
      return Err(match marker {
        ActionMarker::Item { id, verb } => SyncError::ActionConflict {
          item_id: id.to_string(),
          verb,
        },
        ActionMarker::Bulk => SyncError::Precondition("a bulk action is already running".into()),
      });
    }
    state.in_flight.insert(marker.clone());
    Ok(ActionGuard {
      inner: Arc::clone(self),
      marker,
    })
  }

  /// Call the transport for one item and fold the outcome into local state.
  async fn execute(&self, verb: ActionVerb, id: &ItemId) -> Result<()> {
    match self.transport.mutate(&self.resource, id, verb).await {
      Ok(()) => {
        info!("{} {} {}", verb, self.resource, id);
        self.apply_success(verb, id);
        Ok(())
      }
      Err(e) => {
        warn!("{} {} {} failed: {}", verb, self.resource, id, e);
        self.state.lock().action_errors.insert(id.clone(), e.clone());
        Err(e)
      }
    }
  }

  fn apply_success(&self, verb: ActionVerb, id: &ItemId) {
    let prefix = CollectionQuery::resource_prefix(&self.resource);
    self.cache.invalidate_by_pattern(|key| key.starts_with(&prefix));

    let mut state = self.state.lock();
    if state.disposed {
      return;
    }
    state.action_errors.remove(id);
    match verb.target_status() {
      Some(status) => {
        state.overrides.record(id.clone(), status);
        if let Some(raw) = state.raw.as_mut() {
          set_status(raw, id, status);
        }
      }
      None => {
        state.overrides.clear(id);
        state.tombstones.insert(id.clone());
        if let Some(raw) = state.raw.as_mut() {
          remove_item(raw, id);
        }
      }
    }
    state.floor = state.issued;
  }

  fn schedule_refetch(self: &Arc<Self>) {
    let mut state = self.state.lock();
    if state.disposed {
      return;
    }
    if let Some(timer) = state.refetch_timer.take() {
      timer.abort();
    }

    let weak = Arc::downgrade(self);
    let delay = self.options.refetch_delay;
    state.refetch_timer = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let Some(inner) = weak.upgrade() else {
        return;
      };
      if let Some((generation, query)) = inner.issue_load() {
        // Errors are swallowed in this mode
        let _ = inner.run_load(generation, query, LoadMode::Reconcile).await;
      }
    }));
  }
}

/// Releases an action marker on drop, on success and failure alike.
struct ActionGuard {
  inner: Arc<Inner>,
  marker: ActionMarker,
}

impl Drop for ActionGuard {
  fn drop(&mut self) {
    self.inner.state.lock().in_flight.remove(&self.marker);
  }
}

/// Optimistic view of one server collection.
///
/// Handles are cheap to clone and share one state. Scheduled work (the
/// delayed refetch and debounced search) is cancelled by [`dispose`] or
/// when the last handle is dropped.
///
/// Must be used from within a tokio runtime.
///
/// [`dispose`]: OptimisticList::dispose
#[derive(Clone)]
pub struct OptimisticList {
  inner: Arc<Inner>,
}

impl OptimisticList {
  pub fn new(
    resource: impl Into<String>,
    transport: Arc<dyn Transport>,
    cache: PayloadCache,
    options: ListOptions,
  ) -> Self {
    let state = State {
      raw: None,
      filters: ListFilters::default(),
      pagination: Pagination::new(1, options.page_size),
      search: String::new(),
      overrides: Overrides::new(),
      tombstones: Tombstones::new(),
      in_flight: BTreeSet::new(),
      loading: false,
      error: None,
      action_errors: HashMap::new(),
      issued: 0,
      floor: 0,
      search_generation: 0,
      refetch_timer: None,
      debounce_timer: None,
      disposed: false,
    };

    Self {
      inner: Arc::new(Inner {
        resource: resource.into(),
        transport,
        cache,
        options,
        state: Mutex::new(state),
      }),
    }
  }

  /// Create a list backed by the process-wide cache.
  pub fn with_global_cache(
    resource: impl Into<String>,
    transport: Arc<dyn Transport>,
    options: ListOptions,
  ) -> Self {
    Self::new(resource, transport, cache::global().clone(), options)
  }

  pub fn resource(&self) -> &str {
    &self.inner.resource
  }

  /// Load the collection through the cache.
  ///
  /// On failure the previously loaded items stay visible and the error is
  /// recorded for the view.
  pub async fn load(&self) -> Result<()> {
    let (generation, query) = self
      .inner
      .issue_load()
      .ok_or_else(|| SyncError::Precondition("list has been disposed".into()))?;
    self.inner.run_load(generation, query, LoadMode::Foreground).await
  }

  /// Drop the cached copy of the current query and load it from the server.
  pub async fn refresh(&self) -> Result<()> {
    let key = {
      let state = self.inner.state.lock();
      self.inner.query(&state.search).cache_key()
    };
    self.inner.cache.invalidate(&key);
    self.load().await
  }

  /// Run `verb` on item `id`.
  ///
  /// On success the result shows up immediately and a refetch is scheduled.
  /// On failure nothing changes locally; the error is recorded per item and
  /// returned. A request for an action that is already running is ignored.
  pub async fn perform_action(&self, verb: ActionVerb, id: impl Into<ItemId>) -> Result<ActionOutcome> {
    let id = id.into();
    let _guard = match self.inner.begin_action(ActionMarker::Item {
      id: id.clone(),
      verb,
    }) {
      Ok(guard) => guard,
      Err(e @ SyncError::ActionConflict { .. }) => {
        debug!("{}", e);
        return Ok(ActionOutcome::Ignored);
      }
      Err(e) => return Err(e),
    };

    self.inner.execute(verb, &id).await?;
    self.inner.schedule_refetch();
    Ok(ActionOutcome::Applied)
  }

  /// Run `verb` on several items, one after the other.
  ///
  /// Only one bulk action runs at a time; a second one skips every item.
  pub async fn perform_bulk_action(&self, verb: ActionVerb, ids: Vec<ItemId>) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    let _bulk = match self.inner.begin_action(ActionMarker::Bulk) {
      Ok(guard) => guard,
      Err(e) => {
        debug!("bulk {} not started: {}", verb, e);
        outcome.skipped = ids;
        return outcome;
      }
    };

    for id in ids {
      let _guard = match self.inner.begin_action(ActionMarker::Item {
        id: id.clone(),
        verb,
      }) {
        Ok(guard) => guard,
        Err(_) => {
          outcome.skipped.push(id);
          continue;
        }
      };
      match self.inner.execute(verb, &id).await {
        Ok(()) => outcome.succeeded.push(id),
        Err(e) => outcome.failed.push((id, e)),
      }
    }

    if !outcome.succeeded.is_empty() {
      self.inner.schedule_refetch();
    }
    outcome
  }

  /// Replace the client-side filters and go back to the first page.
  ///
  /// Does not change the server-side search; see [`set_search`](Self::set_search).
  pub fn set_filters(&self, filters: ListFilters) {
    let mut state = self.inner.state.lock();
    state.filters = filters;
    state.pagination.page = 1;
  }

  pub fn set_page(&self, page: usize) {
    self.inner.state.lock().pagination.page = page.max(1);
  }

  /// Update the search text and, after the debounce period, load the
  /// matching collection from the server.
  ///
  /// Only the most recently issued search can update the list, whatever
  /// order the responses arrive in.
  pub fn set_search(&self, query: impl Into<String>) {
    let query = query.into();
    let mut state = self.inner.state.lock();
    if state.disposed {
      return;
    }
    state.filters.query = query.clone();
    state.pagination.page = 1;
    state.search_generation += 1;
    let generation = state.search_generation;
    if let Some(timer) = state.debounce_timer.take() {
      timer.abort();
    }

    let weak: Weak<Inner> = Arc::downgrade(&self.inner);
    let delay = self.inner.options.search_debounce;
    state.debounce_timer = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let Some(inner) = weak.upgrade() else {
        return;
      };
      let load = {
        let mut state = inner.state.lock();
        if state.search_generation != generation {
          return;
        }
        // Detach ourselves so a later keystroke doesn't abort this load
        state.debounce_timer.take();
        state.search = query;
        drop(state);
        inner.issue_load()
      };
      if let Some((generation, query)) = load {
        let _ = inner.run_load(generation, query, LoadMode::Foreground).await;
      }
    }));
  }

  /// Search right away, skipping the debounce. Supersedes any pending or
  /// running search.
  pub async fn submit_search(&self, query: impl Into<String>) -> Result<()> {
    let query = query.into();
    {
      let mut state = self.inner.state.lock();
      if let Some(timer) = state.debounce_timer.take() {
        timer.abort();
      }
      state.search_generation += 1;
      state.filters.query = query.clone();
      state.pagination.page = 1;
      state.search = query;
    }
    self.load().await
  }

  /// Warm the cache for another search without touching this list.
  pub async fn prefetch_search(&self, search: &str) {
    let query = self.inner.query(search);
    let transport = Arc::clone(&self.inner.transport);
    let key = query.cache_key();
    self
      .inner
      .cache
      .prefetch(
        &key,
        move || async move { transport.fetch(&query).await },
        self.inner.options.policy,
      )
      .await;
  }

  /// The current page of derived items.
  pub fn derived_view(&self) -> Page<NormalizedItem> {
    let state = self.inner.state.lock();
    derive_view(
      state.raw.as_ref(),
      &state.overrides,
      &state.tombstones,
      &state.filters,
      state.pagination,
    )
  }

  /// Everything a view needs to render.
  pub fn snapshot(&self) -> ListSnapshot {
    let state = self.inner.state.lock();
    let page = derive_view(
      state.raw.as_ref(),
      &state.overrides,
      &state.tombstones,
      &state.filters,
      state.pagination,
    );
    ListSnapshot {
      items: page.items,
      total_items: page.total_items,
      total_pages: page.total_pages,
      page: page.page,
      loading: state.loading,
      error: state.error.clone(),
      action_loading: state.in_flight.iter().cloned().collect(),
      action_errors: state.action_errors.clone(),
    }
  }

  pub fn filters(&self) -> ListFilters {
    self.inner.state.lock().filters.clone()
  }

  /// Number of optimistic statuses still waiting for server confirmation.
  pub fn pending_overrides(&self) -> usize {
    self.inner.state.lock().overrides.len()
  }

  /// Number of locally deleted items the server still lists.
  pub fn pending_deletions(&self) -> usize {
    self.inner.state.lock().tombstones.len()
  }

  /// Cancel scheduled work. Later loads and actions fail with a
  /// precondition error.
  pub fn dispose(&self) {
    let mut state = self.inner.state.lock();
    state.disposed = true;
    state.loading = false;
    state.cancel_timers();
    debug!("disposed list for {}", self.inner.resource);
  }
}

impl std::fmt::Debug for OptimisticList {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OptimisticList")
      .field("resource", &self.inner.resource)
      .field("options", &self.inner.options)
      .finish_non_exhaustive()
  }
}
