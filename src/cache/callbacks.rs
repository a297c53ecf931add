//! Callback Module
//!
//! Observer traits for item lifecycle transitions and on-miss loading.
//!
//! Each trait has a blanket implementation for matching closures, so
//! `table.add_added_item_callback(|item| ...)` works without a wrapper type.
//!
//! Observers run through [`run_guarded`]: a panicking observer is logged
//! and skipped, and the table carries on with its own bookkeeping.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value as LoaderArg;
use tracing::error;

use crate::cache::CacheItem;

// == Table Observers ==
/// Notified after an item has been inserted into a table.
pub trait ItemAddedListener<K, V>: Send + Sync {
    fn on_item_added(&self, item: &Arc<CacheItem<K, V>>);
}

impl<K, V, F> ItemAddedListener<K, V> for F
where
    F: Fn(&Arc<CacheItem<K, V>>) + Send + Sync,
{
    fn on_item_added(&self, item: &Arc<CacheItem<K, V>>) {
        self(item)
    }
}

/// Notified right before an item leaves a table, by deletion or expiry.
pub trait AboutToDeleteListener<K, V>: Send + Sync {
    fn on_about_to_delete(&self, item: &Arc<CacheItem<K, V>>);
}

impl<K, V, F> AboutToDeleteListener<K, V> for F
where
    F: Fn(&Arc<CacheItem<K, V>>) + Send + Sync,
{
    fn on_about_to_delete(&self, item: &Arc<CacheItem<K, V>>) {
        self(item)
    }
}

// == Item Observers ==
/// Registered on a single item; receives the key of the item being removed.
pub trait AboutToExpireListener<K>: Send + Sync {
    fn on_about_to_expire(&self, key: &K);
}

impl<K, F> AboutToExpireListener<K> for F
where
    F: Fn(&K) + Send + Sync,
{
    fn on_about_to_expire(&self, key: &K) {
        self(key)
    }
}

// == Data Loader ==
/// Synthesizes an item on a cache miss.
///
/// The returned item's lifespan and value are inserted under the requested
/// key. Returning `None` makes the lookup fail with
/// [`CacheError::KeyNotFoundOrNotLoadable`](crate::CacheError::KeyNotFoundOrNotLoadable).
pub trait DataLoader<K, V>: Send + Sync {
    fn load(&self, key: &K, args: &[LoaderArg]) -> Option<CacheItem<K, V>>;
}

impl<K, V, F> DataLoader<K, V> for F
where
    F: Fn(&K, &[LoaderArg]) -> Option<CacheItem<K, V>> + Send + Sync,
{
    fn load(&self, key: &K, args: &[LoaderArg]) -> Option<CacheItem<K, V>> {
        self(key, args)
    }
}

// == Listener List ==
/// Ordered list of shared observers with replace/append/clear semantics.
pub(crate) struct Listeners<L: ?Sized> {
    entries: Vec<Arc<L>>,
}

impl<L: ?Sized> Listeners<L> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Replaces the whole list with a single observer.
    pub(crate) fn set(&mut self, listener: Arc<L>) {
        self.entries.clear();
        self.entries.push(listener);
    }

    pub(crate) fn push(&mut self, listener: Arc<L>) {
        self.entries.push(listener);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Clones the current list so it can be invoked after the owning lock is released.
    pub(crate) fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries.clone()
    }
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}

// == Panic Guard ==
/// Runs one observer, containing any panic it raises.
///
/// # Arguments
/// * `owner` - Name of the table (or item context) the observer belongs to
/// * `hook` - Which lifecycle hook is running, for the log line
/// * `observer` - The call to make
///
/// # Returns
/// `true` if the observer returned normally, `false` if it panicked.
pub(crate) fn run_guarded<F: FnOnce()>(owner: &str, hook: &'static str, observer: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(observer)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                table = %owner,
                hook,
                panic = %panic_payload_message(payload),
                "Callback panicked"
            );
            false
        }
    }
}

fn panic_payload_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_listeners_set_replaces_everything() {
        let mut listeners: Listeners<dyn AboutToExpireListener<String>> = Listeners::new();
        listeners.push(Arc::new(|_: &String| {}));
        listeners.push(Arc::new(|_: &String| {}));
        assert_eq!(listeners.len(), 2);

        listeners.set(Arc::new(|_: &String| {}));
        assert_eq!(listeners.len(), 1);

        listeners.clear();
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_snapshot_is_detached_from_list() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut listeners: Listeners<dyn AboutToExpireListener<u32>> = Listeners::new();
        let counter = calls.clone();
        listeners.push(Arc::new(move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let snapshot = listeners.snapshot();
        listeners.clear();

        for listener in &snapshot {
            listener.on_about_to_expire(&7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_guarded_contains_panics() {
        let ran = Arc::new(AtomicUsize::new(0));

        assert!(!run_guarded("unit", "about_to_delete", || panic!("observer failed")));

        let r = ran.clone();
        assert!(run_guarded("unit", "item_added", move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_payload_message() {
        assert_eq!(panic_payload_message(Box::new("static")), "static");
        assert_eq!(panic_payload_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_payload_message(Box::new(42u8)), "unknown panic");
    }

    #[test]
    fn test_closure_loader() {
        let loader = |key: &String, args: &[LoaderArg]| {
            Some(CacheItem::new(key.clone(), std::time::Duration::ZERO, args.len()))
        };
        let item = loader
            .load(&"k".to_string(), &[LoaderArg::from(1), LoaderArg::from("x")])
            .unwrap();
        assert_eq!(*item.value(), 2);
    }
}
