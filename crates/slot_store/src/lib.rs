//! # Slot Store
//!
//! This crate provides the local persistent cache used by the CoWin notifier to remember
//! the last availability it observed for every search. Entries are JSON documents keyed by
//! string and carry an expiry time after which they are treated as absent.

/// SQLite connection helpers.
pub mod database;
/// Key-value cache with per-entry time-to-live.
pub mod cache_store;
/// Error types for store operations.
pub mod types;

pub use cache_store::CacheStore;
pub use types::StoreError;
