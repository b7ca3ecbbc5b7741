//! Search, filter, sort and paginate a normalized item list.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;

use crate::payload::NormalizedItem;

/// Field to sort items by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SortKey {
  #[default]
  #[value(name = "created_at")]
  CreatedAt,
  #[value(name = "status")]
  Status,
  #[value(name = "user_id")]
  UserId,
}

impl SortKey {
  /// Extract the lexical sort value of this key from an item
  fn extract(&self, item: &NormalizedItem) -> String {
    match self {
      SortKey::CreatedAt => item.created_at.clone().unwrap_or_default(),
      SortKey::Status => item.status.clone().unwrap_or_default(),
      SortKey::UserId => match item.fields.get("user_id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
      },
    }
  }

  fn compare(&self, a: &NormalizedItem, b: &NormalizedItem) -> Ordering {
    match self {
      SortKey::CreatedAt => created_timestamp(a).cmp(&created_timestamp(b)),
      SortKey::Status | SortKey::UserId => self.extract(a).cmp(&self.extract(b)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SortOrder {
  Asc,
  #[default]
  Desc,
}

/// User-controlled list filters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListFilters {
  /// Case-insensitive substring matched against string fields
  pub query: String,
  /// `None` shows every status
  pub status: Option<String>,
  pub date_from: Option<NaiveDate>,
  pub date_to: Option<NaiveDate>,
  pub sort_by: SortKey,
  pub sort_order: SortOrder,
}

impl ListFilters {
  /// Set the status filter. `"all"` and the empty string clear it.
  pub fn with_status(mut self, status: &str) -> Self {
    self.status = match status.trim() {
      "" => None,
      s if s.eq_ignore_ascii_case("all") => None,
      s => Some(s.to_string()),
    };
    self
  }

  fn matches(&self, item: &NormalizedItem) -> bool {
    matches_search(item, &self.query)
      && self.status.as_ref().map_or(true, |s| item.status.as_ref() == Some(s))
      && self.matches_date_range(item)
  }

  /// Inclusive range on the creation date. Only applies when both bounds are set.
  fn matches_date_range(&self, item: &NormalizedItem) -> bool {
    let (Some(from), Some(to)) = (self.date_from, self.date_to) else {
      return true;
    };
    item
      .created_at
      .as_deref()
      .and_then(parse_timestamp)
      .map(|ts| {
        let day = ts.date_naive();
        from <= day && day <= to
      })
      .unwrap_or(false)
  }
}

/// 1-based page position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
  pub page: usize,
  pub page_size: usize,
}

impl Pagination {
  pub fn new(page: usize, page_size: usize) -> Self {
    Self {
      page: page.max(1),
      page_size: page_size.max(1),
    }
  }
}

impl Default for Pagination {
  fn default() -> Self {
    Self::new(1, 20)
  }
}

/// One page of a derived list.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub items: Vec<T>,
  /// Items matching the filters, across all pages
  pub total_items: usize,
  pub total_pages: usize,
  /// The page actually shown, after clamping
  pub page: usize,
}

/// Search against string-typed fields only.
pub fn matches_search(item: &NormalizedItem, query: &str) -> bool {
  let needle = query.trim().to_lowercase();
  if needle.is_empty() {
    return true;
  }
  item
    .fields
    .values()
    .filter_map(Value::as_str)
    .any(|s| s.to_lowercase().contains(&needle))
}

/// Parse the timestamp formats seen in list payloads.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
    return Some(ts.with_timezone(&Utc));
  }
  for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
      return Some(ts.and_utc());
    }
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|ts| ts.and_utc())
}

/// Creation time for sorting. Missing or invalid dates sort as the epoch.
fn created_timestamp(item: &NormalizedItem) -> DateTime<Utc> {
  item
    .created_at
    .as_deref()
    .and_then(parse_timestamp)
    .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Filter and stable-sort items. Ties keep their original order.
pub fn filter_and_sort(items: Vec<NormalizedItem>, filters: &ListFilters) -> Vec<NormalizedItem> {
  let mut items: Vec<NormalizedItem> = items.into_iter().filter(|i| filters.matches(i)).collect();
  items.sort_by(|a, b| {
    let ord = filters.sort_by.compare(a, b);
    match filters.sort_order {
      SortOrder::Asc => ord,
      SortOrder::Desc => ord.reverse(),
    }
  });
  items
}

/// Slice out one page, clamping the page number into range.
pub fn paginate<T>(items: Vec<T>, pagination: Pagination) -> Page<T> {
  let total_items = items.len();
  let total_pages = total_items.div_ceil(pagination.page_size).max(1);
  let page = pagination.page.clamp(1, total_pages);
  let items = items
    .into_iter()
    .skip((page - 1) * pagination.page_size)
    .take(pagination.page_size)
    .collect();

  Page {
    items,
    total_items,
    total_pages,
    page,
  }
}
