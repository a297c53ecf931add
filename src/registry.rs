//! Table Registry Module
//!
//! Named cache tables, either in an explicit [`Registry`] handle or in the
//! process-wide registry behind [`cache`].

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::cache::CacheTable;
use crate::error::{CacheError, Result};

// == Registry ==
/// A set of tables of one key/value type, looked up by name.
pub struct Registry<K, V> {
    tables: RwLock<HashMap<String, CacheTable<K, V>>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the table called `name`, creating it on first use.
    pub fn table(&self, name: &str) -> CacheTable<K, V> {
        if let Some(table) = self.tables.read().get(name) {
            return table.clone();
        }

        // Re-checked under the write lock; another caller may have won the race
        self.tables
            .write()
            .entry(name.to_string())
            .or_insert_with(|| CacheTable::new(name))
            .clone()
    }

    /// Returns the table called `name` without creating it.
    pub fn get(&self, name: &str) -> Option<CacheTable<K, V>> {
        self.tables.read().get(name).cloned()
    }

    /// Unregisters a table. Existing handles keep working.
    pub fn remove(&self, name: &str) -> Option<CacheTable<K, V>> {
        self.tables.write().remove(name)
    }

    /// Returns the names of every registered table, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// == Global Registry ==
static GLOBAL_TABLES: Lazy<RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Returns the process-wide table called `name`, creating it on first use.
///
/// # Arguments
/// * `name` - Table name, unique across the process
///
/// # Returns
/// - `Ok(table)` with a handle to the shared table
/// - `Err(CacheError::TableTypeMismatch)` if the name is already taken by
///   a table with different key/value types
pub fn cache<K, V>(name: &str) -> Result<CacheTable<K, V>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    if let Some(entry) = GLOBAL_TABLES.read().get(name) {
        return downcast_table(name, &**entry);
    }

    let mut tables = GLOBAL_TABLES.write();
    let entry = tables.entry(name.to_string()).or_insert_with(|| {
        debug!(table = %name, "Registering global cache table");
        let table: Box<dyn Any + Send + Sync> = Box::new(CacheTable::<K, V>::new(name));
        table
    });
    downcast_table(name, &**entry)
}

fn downcast_table<K, V>(name: &str, entry: &(dyn Any + Send + Sync)) -> Result<CacheTable<K, V>>
where
    K: 'static,
    V: 'static,
{
    entry
        .downcast_ref::<CacheTable<K, V>>()
        .cloned()
        .ok_or_else(|| CacheError::TableTypeMismatch(name.to_string()))
}
