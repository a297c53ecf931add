//! Cache Item Module
//!
//! Defines individual cache items: an immutable key/value pair with a
//! lifespan, plus access metadata guarded by the item's own lock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::cache::callbacks::{run_guarded, AboutToExpireListener, Listeners};

/// Mutable access metadata, updated on every successful lookup.
#[derive(Debug, Clone, Copy)]
struct AccessMeta {
    accessed_on: DateTime<Utc>,
    access_count: u64,
}

// == Cache Item ==
/// A single cached entry.
///
/// `key`, `value`, `lifespan` and `created_on` never change after
/// construction and are read without locking. Access metadata and the
/// expiry callbacks sit behind the item's own lock.
pub struct CacheItem<K, V> {
    key: K,
    value: V,
    /// Zero means the item never expires
    lifespan: Duration,
    created_on: DateTime<Utc>,
    meta: RwLock<AccessMeta>,
    about_to_expire: RwLock<Listeners<dyn AboutToExpireListener<K>>>,
}

impl<K, V> CacheItem<K, V> {
    // == Constructor ==
    /// Creates a new item. `accessed_on` starts equal to `created_on` and
    /// the access count starts at zero.
    ///
    /// # Arguments
    /// * `key` - The key the item will be stored under
    /// * `lifespan` - Idle time after which the item expires (`Duration::ZERO` = never)
    /// * `value` - The value to cache
    pub fn new(key: K, lifespan: Duration, value: V) -> Self {
        let now = Utc::now();
        Self {
            key,
            value,
            lifespan,
            created_on: now,
            meta: RwLock::new(AccessMeta {
                accessed_on: now,
                access_count: 0,
            }),
            about_to_expire: RwLock::new(Listeners::new()),
        }
    }

    // == Keep Alive ==
    /// Marks the item as accessed: refreshes `accessed_on` and increments
    /// the access count.
    ///
    /// The table calls this on every lookup hit. `accessed_on` never moves
    /// backwards, even if the wall clock does.
    pub fn keep_alive(&self) {
        let now = Utc::now();
        let mut meta = self.meta.write();
        if now > meta.accessed_on {
            meta.accessed_on = now;
        }
        meta.access_count += 1;
    }

    // == Immutable Getters ==
    /// Returns the key this item is stored under. Immutable, no locking.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the cached value. Immutable, no locking.
    ///
    /// Callers share this value with the table and must not mutate it
    /// through interior mutability.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the item's lifespan; `Duration::ZERO` means it never expires.
    pub fn lifespan(&self) -> Duration {
        self.lifespan
    }

    /// Returns when the item was constructed.
    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    /// Returns when this item was last accessed.
    pub fn accessed_on(&self) -> DateTime<Utc> {
        self.meta.read().accessed_on
    }

    /// Returns how often this item has been retrieved through the table.
    pub fn access_count(&self) -> u64 {
        self.meta.read().access_count
    }

    // == Expiry ==
    /// Returns true if the item has a lifespan and it elapsed since the
    /// last access, as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.remaining_at(now), Some(remaining) if remaining.is_zero())
    }

    /// Remaining time-to-live as of `now`, measured from the last access.
    ///
    /// # Returns
    /// - `None` if the item has no lifespan (never expires)
    /// - `Some(Duration::ZERO)` once the lifespan has fully elapsed
    /// - `Some(remaining)` otherwise
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.lifespan.is_zero() {
            return None;
        }
        // Snapshot under the item lock; races with keep_alive otherwise
        let accessed_on = self.accessed_on();
        let idle = (now - accessed_on).to_std().unwrap_or(Duration::ZERO);
        Some(self.lifespan.saturating_sub(idle))
    }

    /// Consumes a detached item, yielding its key, lifespan and value.
    pub(crate) fn into_parts(self) -> (K, Duration, V) {
        (self.key, self.lifespan, self.value)
    }

    // == Expiry Callbacks ==
    /// Replaces all expiry callbacks with `f`.
    pub fn set_about_to_expire_callback<F>(&self, f: F)
    where
        F: AboutToExpireListener<K> + 'static,
    {
        self.about_to_expire.write().set(Arc::new(f));
    }

    /// Appends an expiry callback.
    pub fn add_about_to_expire_callback<F>(&self, f: F)
    where
        F: AboutToExpireListener<K> + 'static,
    {
        self.about_to_expire.write().push(Arc::new(f));
    }

    /// Removes every expiry callback.
    pub fn remove_about_to_expire_callbacks(&self) {
        self.about_to_expire.write().clear();
    }

    /// Runs the expiry callbacks with this item's key, outside the item lock.
    ///
    /// A panicking callback is logged against `owner` and the rest still run.
    pub(crate) fn notify_about_to_expire(&self, owner: &str) {
        let callbacks = self.about_to_expire.read().snapshot();
        for callback in callbacks {
            run_guarded(owner, "about_to_expire", || {
                callback.on_about_to_expire(&self.key)
            });
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for CacheItem<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = *self.meta.read();
        f.debug_struct("CacheItem")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("lifespan", &self.lifespan)
            .field("created_on", &self.created_on)
            .field("accessed_on", &meta.accessed_on)
            .field("access_count", &meta.access_count)
            .finish()
    }
}
