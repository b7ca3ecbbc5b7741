//! Optimistic state layered over server data until the server agrees.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::payload::{write_status, ItemId, NormalizedItem};

/// Desired-but-unconfirmed statuses, keyed by item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
  desired: HashMap<ItemId, String>,
}

impl Overrides {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, id: ItemId, status: impl Into<String>) {
    self.desired.insert(id, status.into());
  }

  pub fn clear(&mut self, id: &ItemId) -> Option<String> {
    self.desired.remove(id)
  }

  pub fn get(&self, id: &ItemId) -> Option<&str> {
    self.desired.get(id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.desired.len()
  }

  pub fn is_empty(&self) -> bool {
    self.desired.is_empty()
  }

  /// Overlay desired statuses onto `items`.
  ///
  /// Items without an identity are passed through untouched.
  pub fn apply(&self, items: Vec<NormalizedItem>) -> Vec<NormalizedItem> {
    if self.desired.is_empty() {
      return items;
    }
    items
      .into_iter()
      .map(|mut item| {
        if let Some(status) = item.id.as_ref().and_then(|id| self.desired.get(id)) {
          write_status(&mut item.fields, status);
          item.status = Some(status.clone());
        }
        item
      })
      .collect()
  }

  /// Retire overrides the server now confirms. Returns the retired ids.
  ///
  /// An override whose item is absent from `server_items` is kept: the item
  /// may simply not be visible yet.
  pub fn reconcile(&mut self, server_items: &[NormalizedItem]) -> Vec<ItemId> {
    let confirmed: Vec<ItemId> = server_items
      .iter()
      .filter_map(|item| {
        let id = item.id.as_ref()?;
        let desired = self.desired.get(id)?;
        (item.status.as_ref() == Some(desired)).then(|| id.clone())
      })
      .collect();

    for id in &confirmed {
      debug!("server confirmed status of {}, dropping override", id);
      self.desired.remove(id);
    }
    confirmed
  }
}

/// Items deleted locally that the server may still be reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tombstones {
  ids: HashSet<ItemId>,
}

impl Tombstones {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, id: ItemId) {
    self.ids.insert(id);
  }

  pub fn contains(&self, id: &ItemId) -> bool {
    self.ids.contains(id)
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  /// Drop tombstoned items from `items`.
  pub fn hide(&self, items: Vec<NormalizedItem>) -> Vec<NormalizedItem> {
    if self.ids.is_empty() {
      return items;
    }
    items
      .into_iter()
      .filter(|item| item.id.as_ref().map_or(true, |id| !self.ids.contains(id)))
      .collect()
  }

  /// Retire tombstones whose item the server no longer lists.
  pub fn reconcile(&mut self, server_items: &[NormalizedItem]) -> Vec<ItemId> {
    let listed: HashSet<&ItemId> = server_items.iter().filter_map(|i| i.id.as_ref()).collect();
    let gone: Vec<ItemId> = self
      .ids
      .iter()
      .filter(|id| !listed.contains(id))
      .cloned()
      .collect();

    for id in &gone {
      debug!("server no longer lists {}, dropping tombstone", id);
      self.ids.remove(id);
    }
    gone
  }
}
