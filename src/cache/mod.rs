//! Cache Module
//!
//! Provides the in-memory cache table: items with per-item TTL, access
//! statistics and lifecycle callbacks.

mod callbacks;
mod item;
mod stats;
mod table;


// Re-export public types
pub use callbacks::{AboutToDeleteListener, AboutToExpireListener, DataLoader, ItemAddedListener};
pub use item::CacheItem;
pub use stats::CacheStats;
pub use table::CacheTable;

/// Dynamically typed extra argument handed to a [`DataLoader`].
pub use serde_json::Value as LoaderArg;
