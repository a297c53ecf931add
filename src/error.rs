//! Error types for the cache table
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache table operations.
///
/// Every variant is a local, recoverable condition. The table never
/// retries internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Lookup or delete target is absent (carries the table name)
    #[error("Key not found in table '{0}'")]
    KeyNotFound(String),

    /// Miss on a table whose data loader declined to produce an item
    #[error("Key not found and could not be loaded in table '{0}'")]
    KeyNotFoundOrNotLoadable(String),

    /// The global registry already holds a table of this name with other key/value types
    #[error("Table '{0}' is registered with different key/value types")]
    TableTypeMismatch(String),
}

// == Result Type Alias ==
/// Convenience Result type for cache table operations.
pub type Result<T> = std::result::Result<T, CacheError>;
