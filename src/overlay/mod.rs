//! Optimistic overlay over server-owned lists.

mod filters;
mod list;
mod overrides;

pub use filters::{
  filter_and_sort, matches_search, paginate, parse_timestamp, ListFilters, Page, Pagination,
  SortKey, SortOrder,
};
pub use list::{
  derive_view, ActionMarker, ActionOutcome, BulkOutcome, ListOptions, ListSnapshot, OptimisticList,
};
pub use overrides::{Overrides, Tombstones};
