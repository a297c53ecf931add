//! TTL Table - an in-process key-value cache
//!
//! Provides named cache tables with per-item time-to-live, access
//! statistics, lifecycle callbacks and optional lazy population on miss.
//!
//! ```ignore
//! use std::time::Duration;
//! use ttl_table::CacheTable;
//!
//! let table: CacheTable<String, String> = CacheTable::new("sessions");
//! table.add("alice".into(), Duration::from_secs(30), "token".into());
//!
//! let item = table.value(&"alice".to_string())?;
//! assert_eq!(item.access_count(), 1);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod registry;
pub mod tasks;

pub use cache::{
    AboutToDeleteListener, AboutToExpireListener, CacheItem, CacheStats, CacheTable, DataLoader,
    ItemAddedListener, LoaderArg,
};
pub use config::Config;
pub use error::{CacheError, Result};
pub use registry::{cache, Registry};
