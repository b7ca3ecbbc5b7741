//! Cache keys for collection reads.

use sha2::{Digest, Sha256};
use std::fmt;

/// A server-side read of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionQuery {
  /// Collection name, also the first path segment (e.g. "requests")
  pub resource: String,
  /// Server-side search text; empty for the unfiltered list
  pub search: String,
}

impl CollectionQuery {
  pub fn new(resource: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      search: String::new(),
    }
  }

  pub fn with_search(mut self, search: impl Into<String>) -> Self {
    self.search = search.into();
    self
  }

  /// Stable cache key: `"{resource}:list:{sha256(normalized search)}"`.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_search(&self.search).as_bytes());
    format!("{}:list:{}", self.resource, hex::encode(hasher.finalize()))
  }

  /// Prefix shared by every cached read of `resource`.
  pub fn resource_prefix(resource: &str) -> String {
    format!("{}:", resource)
  }
}

impl fmt::Display for CollectionQuery {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.search.is_empty() {
      write!(f, "{}", self.resource)
    } else {
      write!(f, "{} matching {:?}", self.resource, self.search)
    }
  }
}

/// Normalize search text for consistent hashing.
/// Trims whitespace and lowercases for case-insensitive matching.
fn normalize_search(search: &str) -> String {
  search.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_equivalent_searches_share_a_key() {
    let a = CollectionQuery::new("requests").with_search("  Refund ");
    let b = CollectionQuery::new("requests").with_search("refund");
    assert_eq!(a.cache_key(), b.cache_key());
  }

  #[test]
  fn test_keys_are_scoped_by_resource() {
    let requests = CollectionQuery::new("requests").cache_key();
    let orders = CollectionQuery::new("orders").cache_key();
    assert_ne!(requests, orders);
    assert!(requests.starts_with(&CollectionQuery::resource_prefix("requests")));
    assert!(!orders.starts_with(&CollectionQuery::resource_prefix("requests")));
  }
}
