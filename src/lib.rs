//! Client-side data synchronization for an admin console.
//!
//! A freshness cache deduplicates and ages collection reads, a shape adapter
//! turns the API's varied list envelopes into one item form, and an
//! optimistic overlay applies write actions locally before the server
//! confirms them.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod overlay;
pub mod payload;

pub use error::{Result, SyncError};
