//! Cache Table Module
//!
//! The concurrent key/item map with lifecycle callbacks, on-miss loading
//! and a self-rescheduling expiration sweep.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use serde_json::Value as LoaderArg;
use tracing::{debug, info, trace};

use crate::cache::callbacks::{
    run_guarded, AboutToDeleteListener, DataLoader, ItemAddedListener, Listeners,
};
use crate::cache::stats::StatsRecorder;
use crate::cache::{CacheItem, CacheStats};
use crate::error::{CacheError, Result};
use crate::tasks::{schedule_sweep, Sweep, SweepTimer};

/// Everything guarded by the table lock.
struct TableState<K, V> {
    items: HashMap<K, Arc<CacheItem<K, V>>>,
    /// Duration of the armed sweep timer, zero when idle
    cleanup_interval: Duration,
    cleanup_timer: Option<SweepTimer>,
    data_loader: Option<Arc<dyn DataLoader<K, V>>>,
    added_item: Listeners<dyn ItemAddedListener<K, V>>,
    about_to_delete: Listeners<dyn AboutToDeleteListener<K, V>>,
}

struct TableInner<K, V> {
    name: String,
    state: RwLock<TableState<K, V>>,
    /// Held for the whole duration of a sweep
    sweeping: Mutex<()>,
    /// Set by insertions that need a sweep, cleared when a sweep round starts
    sweep_requested: AtomicBool,
    stats: StatsRecorder,
    this: Weak<TableInner<K, V>>,
}

// == Cache Table ==
/// A named, thread-safe cache table.
///
/// Cloning yields another handle to the same table. Items are handed out
/// as `Arc<CacheItem>`; the table never copies values.
///
/// No user callback (added, about-to-delete, item expiry, data loader) is
/// ever invoked while the table lock is held, so callbacks may freely call
/// back into the table. The exceptions are [`CacheTable::for_each`], whose
/// visitor runs under the shared lock, and [`CacheTable::expiration_check`],
/// which must not be called from a callback.
///
/// A panicking lifecycle callback is logged and skipped; the table still
/// completes the insertion or removal it was notifying about.
pub struct CacheTable<K, V> {
    inner: Arc<TableInner<K, V>>,
}

impl<K, V> Clone for CacheTable<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> CacheTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an empty, idle table.
    ///
    /// # Arguments
    /// * `name` - Identifies the table in logs and errors
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(table = %name, "Creating cache table");
        let inner = Arc::new_cyclic(|this| TableInner {
            name,
            state: RwLock::new(TableState {
                items: HashMap::new(),
                cleanup_interval: Duration::ZERO,
                cleanup_timer: None,
                data_loader: None,
                added_item: Listeners::new(),
                about_to_delete: Listeners::new(),
            }),
            sweeping: Mutex::new(()),
            sweep_requested: AtomicBool::new(false),
            stats: StatsRecorder::default(),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Returns the table's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // == Count ==
    /// Returns the current number of items.
    pub fn count(&self) -> usize {
        self.inner.state.read().items.len()
    }

    // == Exists ==
    /// Membership test. Does not refresh the item's access metadata.
    pub fn exists(&self, key: &K) -> bool {
        self.inner.state.read().items.contains_key(key)
    }

    // == Add ==
    /// Inserts a new item, replacing any item stored under the same key.
    ///
    /// Fires the added-item callbacks, then requests a sweep if the new
    /// lifespan is more imminent than the armed interval.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `lifespan` - Idle time after which the item expires (`Duration::ZERO` = never)
    /// * `value` - The value to store
    ///
    /// # Returns
    /// The newly inserted item.
    pub fn add(&self, key: K, lifespan: Duration, value: V) -> Arc<CacheItem<K, V>> {
        let item = Arc::new(CacheItem::new(key, lifespan, value));
        let state = self.inner.state.write();
        self.inner.insert_locked(state, item.clone());
        item
    }

    // == Not Found Add ==
    /// Inserts only if the key is absent.
    ///
    /// The membership check and the insertion share one critical section,
    /// so concurrent callers racing on one key see exactly one winner.
    ///
    /// # Returns
    /// - `true` if the item was inserted
    /// - `false` if the key was already present (the existing item is untouched)
    pub fn not_found_add(&self, key: K, lifespan: Duration, value: V) -> bool {
        let state = self.inner.state.write();
        if state.items.contains_key(&key) {
            return false;
        }
        let item = Arc::new(CacheItem::new(key, lifespan, value));
        self.inner.insert_locked(state, item);
        true
    }

    // == Delete ==
    /// Removes and returns the item stored under `key`.
    ///
    /// The table's about-to-delete callbacks run first, then the item's own
    /// expiry callbacks, both before the entry leaves the map.
    ///
    /// # Returns
    /// - `Ok(item)` with the removed item
    /// - `Err(CacheError::KeyNotFound)` if nothing is stored under `key`
    pub fn delete(&self, key: &K) -> Result<Arc<CacheItem<K, V>>> {
        let item = self
            .inner
            .state
            .read()
            .items
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::KeyNotFound(self.inner.name.clone()))?;

        if self.inner.remove_item(&item) {
            self.inner.stats.record_deletion();
        }
        Ok(item)
    }

    // == Value ==
    /// Looks up `key`, refreshing its access metadata on a hit.
    ///
    /// On a miss the data loader (if any) is consulted with no extra arguments.
    pub fn value(&self, key: &K) -> Result<Arc<CacheItem<K, V>>> {
        self.value_with(key, &[])
    }

    /// Like [`CacheTable::value`], passing `args` through to the data loader.
    ///
    /// # Returns
    /// - `Ok(item)` on a hit (access count incremented) or a successful load
    /// - `Err(CacheError::KeyNotFoundOrNotLoadable)` if the loader declined
    /// - `Err(CacheError::KeyNotFound)` on a miss with no loader configured
    pub fn value_with(&self, key: &K, args: &[LoaderArg]) -> Result<Arc<CacheItem<K, V>>> {
        let (hit, loader) = {
            let state = self.inner.state.read();
            (state.items.get(key).cloned(), state.data_loader.clone())
        };

        if let Some(item) = hit {
            item.keep_alive();
            self.inner.stats.record_hit();
            trace!(table = %self.inner.name, "Cache hit");
            return Ok(item);
        }
        self.inner.stats.record_miss();

        let Some(loader) = loader else {
            return Err(CacheError::KeyNotFound(self.inner.name.clone()));
        };
        let Some(loaded) = loader.load(key, args) else {
            debug!(table = %self.inner.name, "Data loader declined a key");
            return Err(CacheError::KeyNotFoundOrNotLoadable(self.inner.name.clone()));
        };

        // Keep the loader's item (and any expiry callbacks on it) when it
        // carries the requested key
        let item = if loaded.key() == key {
            Arc::new(loaded)
        } else {
            let (_, lifespan, value) = loaded.into_parts();
            Arc::new(CacheItem::new(key.clone(), lifespan, value))
        };
        self.inner.stats.record_load();

        let state = self.inner.state.write();
        self.inner.insert_locked(state, item.clone());
        Ok(item)
    }

    // == Flush ==
    /// Discards every item and cancels the armed sweep. No callbacks fire.
    pub fn flush(&self) {
        let mut state = self.inner.state.write();
        info!(
            table = %self.inner.name,
            items = state.items.len(),
            "Flushing table"
        );

        state.items = HashMap::new();
        state.cleanup_interval = Duration::ZERO;
        if let Some(timer) = state.cleanup_timer.take() {
            timer.cancel();
        }
        // A cancelled trigger must not leave a stale request behind
        self.inner.sweep_requested.store(false, Ordering::Release);
    }

    // == Most Accessed ==
    /// Returns up to `count` items ordered by descending access count.
    ///
    /// Ties are ordered arbitrarily. The ranking is taken from one snapshot
    /// under the shared lock.
    pub fn most_accessed(&self, count: usize) -> Vec<Arc<CacheItem<K, V>>> {
        let mut ranked: Vec<(u64, Arc<CacheItem<K, V>>)> = {
            let state = self.inner.state.read();
            state
                .items
                .values()
                .map(|item| (item.access_count(), item.clone()))
                .collect()
        };

        ranked.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        ranked
            .into_iter()
            .take(count)
            .map(|(_, item)| item)
            .collect()
    }

    // == For Each ==
    /// Visits every item under the shared lock.
    ///
    /// The visitor must not mutate this table; doing so deadlocks.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &Arc<CacheItem<K, V>>),
    {
        let state = self.inner.state.read();
        for (key, item) in state.items.iter() {
            visit(key, item);
        }
    }

    // == Stats ==
    /// Returns a snapshot of the table's counters.
    pub fn stats(&self) -> CacheStats {
        let total_entries = self.count();
        self.inner.stats.snapshot(total_entries)
    }

    /// Duration of the currently armed sweep timer, zero when idle.
    pub fn cleanup_interval(&self) -> Duration {
        self.inner.state.read().cleanup_interval
    }

    // == Expiration Check ==
    /// Runs an expiration sweep on the calling thread and re-arms the timer.
    ///
    /// Blocks while another sweep of this table is running. Must not be
    /// called from inside one of this table's callbacks.
    pub fn expiration_check(&self) {
        let sweeping = self.inner.sweeping.lock();
        self.inner.sweep_locked(sweeping);
    }

    // == Data Loader ==
    /// Configures the loader consulted on lookup misses, replacing any previous one.
    pub fn set_data_loader<F>(&self, loader: F)
    where
        F: DataLoader<K, V> + 'static,
    {
        self.inner.state.write().data_loader = Some(Arc::new(loader));
    }

    /// Removes the data loader; later misses fail with `KeyNotFound`.
    pub fn remove_data_loader(&self) {
        self.inner.state.write().data_loader = None;
    }

    // == Added Item Callbacks ==
    /// Replaces every added-item callback with `f`.
    pub fn set_added_item_callback<F>(&self, f: F)
    where
        F: ItemAddedListener<K, V> + 'static,
    {
        self.inner.state.write().added_item.set(Arc::new(f));
    }

    /// Appends an added-item callback; callbacks run in registration order.
    pub fn add_added_item_callback<F>(&self, f: F)
    where
        F: ItemAddedListener<K, V> + 'static,
    {
        self.inner.state.write().added_item.push(Arc::new(f));
    }

    /// Removes every added-item callback.
    pub fn remove_added_item_callbacks(&self) {
        self.inner.state.write().added_item.clear();
    }

    // == About To Delete Callbacks ==
    /// Replaces every about-to-delete callback with `f`.
    pub fn set_about_to_delete_item_callback<F>(&self, f: F)
    where
        F: AboutToDeleteListener<K, V> + 'static,
    {
        self.inner.state.write().about_to_delete.set(Arc::new(f));
    }

    /// Appends an about-to-delete callback; callbacks run in registration order.
    pub fn add_about_to_delete_item_callback<F>(&self, f: F)
    where
        F: AboutToDeleteListener<K, V> + 'static,
    {
        self.inner.state.write().about_to_delete.push(Arc::new(f));
    }

    /// Removes every about-to-delete callback.
    pub fn remove_about_to_delete_item_callbacks(&self) {
        self.inner.state.write().about_to_delete.clear();
    }
}

impl<K, V> TableInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Inserts `item` while holding `state`, then releases the lock before
    /// running callbacks and the sweep trigger.
    fn insert_locked(
        &self,
        mut state: RwLockWriteGuard<'_, TableState<K, V>>,
        item: Arc<CacheItem<K, V>>,
    ) {
        debug!(
            table = %self.name,
            lifespan = ?item.lifespan(),
            "Adding item"
        );
        state.items.insert(item.key().clone(), item.clone());

        let armed_interval = state.cleanup_interval;
        let callbacks = state.added_item.snapshot();
        drop(state);

        for callback in callbacks {
            run_guarded(&self.name, "item_added", || callback.on_item_added(&item));
        }

        let lifespan = item.lifespan();
        if !lifespan.is_zero() && (armed_interval.is_zero() || lifespan < armed_interval) {
            self.trigger_sweep();
        }
    }

    /// Requests a sweep as soon as possible.
    ///
    /// Requests coalesce: while one is outstanding (a queued trigger, or a
    /// running sweep that has not started its next round), further calls
    /// return immediately, because that sweep will see the new item.
    fn trigger_sweep(&self) {
        if self.sweep_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.write();
        if let Some(timer) = state.cleanup_timer.take() {
            timer.cancel();
        }
        state.cleanup_timer = Some(schedule_sweep(self.this.clone(), Duration::ZERO));
    }

    /// Runs the removal protocol for `item`.
    ///
    /// Callbacks run unlocked; the entry is then removed only if the map
    /// still holds this very item. Returns whether it was removed.
    fn remove_item(&self, item: &Arc<CacheItem<K, V>>) -> bool {
        let callbacks = self.state.read().about_to_delete.snapshot();
        for callback in callbacks {
            run_guarded(&self.name, "about_to_delete", || {
                callback.on_about_to_delete(item)
            });
        }
        item.notify_about_to_expire(&self.name);

        let mut state = self.state.write();
        let still_current = matches!(
            state.items.get(item.key()),
            Some(current) if Arc::ptr_eq(current, item)
        );
        if still_current {
            state.items.remove(item.key());
            debug!(
                table = %self.name,
                created_on = %item.created_on(),
                hits = item.access_count(),
                "Deleting item"
            );
        }
        still_current
    }

    /// The sweep proper. `sweeping` is this table's sweep lock, already held.
    ///
    /// Evicts in rounds until a pass finds nothing expired; that final pass
    /// arms the timer for the minimum remaining TTL (or goes idle).
    fn sweep_locked(&self, sweeping: MutexGuard<'_, ()>) {
        let mut evicted = 0usize;

        loop {
            let mut state = self.state.write();
            // Everything inserted so far is visible to this round
            self.sweep_requested.store(false, Ordering::Release);

            let now = Utc::now();
            let mut expired = Vec::new();
            let mut smallest: Option<Duration> = None;

            for item in state.items.values() {
                match item.remaining_at(now) {
                    None => {}
                    Some(remaining) if remaining.is_zero() => expired.push(item.clone()),
                    Some(remaining) => {
                        smallest = Some(smallest.map_or(remaining, |s| s.min(remaining)));
                    }
                }
            }

            if expired.is_empty() {
                if let Some(timer) = state.cleanup_timer.take() {
                    timer.cancel();
                }
                let interval = smallest.unwrap_or(Duration::ZERO);
                state.cleanup_interval = interval;
                if interval.is_zero() {
                    debug!(table = %self.name, "Expiration sweep going idle");
                } else {
                    debug!(table = %self.name, interval = ?interval, "Expiration sweep armed");
                    state.cleanup_timer = Some(schedule_sweep(self.this.clone(), interval));
                }
                // Released before the table lock: a trigger queued right after
                // this pass must find the sweep lock free
                drop(sweeping);
                drop(state);
                break;
            }

            // Callbacks must not run under the table lock
            drop(state);
            for item in expired {
                if self.remove_item(&item) {
                    self.stats.record_expiration();
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            info!(table = %self.name, evicted, "Expiration sweep removed items");
        }
    }
}

impl<K, V> Sweep for TableInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Timer entry point. Never waits for a running sweep of the same
    /// table: that sweep's next round (or final pass) covers this firing.
    fn sweep(&self) {
        match self.sweeping.try_lock() {
            Some(sweeping) => self.sweep_locked(sweeping),
            None => trace!(table = %self.name, "Sweep already running, firing coalesced"),
        }
    }
}

impl<K, V> Drop for TableInner<K, V> {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().cleanup_timer.take() {
            timer.cancel();
        }
    }
}

impl<K, V> fmt::Debug for CacheTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("CacheTable")
            .field("name", &self.inner.name)
            .field("items", &state.items.len())
            .field("cleanup_interval", &state.cleanup_interval)
            .field("added_item_callbacks", &state.added_item.len())
            .field("about_to_delete_callbacks", &state.about_to_delete.len())
            .finish()
    }
}
