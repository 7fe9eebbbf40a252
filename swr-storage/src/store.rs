//! Store trait.
//!
//! A store maps keys to [`CacheEntry`] instances and nothing else: it has no
//! fetch logic. Stores may be cleared or have entries replaced at any time by
//! code outside the resource engine; bindings observe such changes through
//! [`Store::subscribe`] and treat the store's current contents as
//! authoritative.

use std::sync::Arc;
use tokio::sync::watch;

use crate::entry::CacheEntry;

/// Pluggable mapping from key to cache entry.
///
/// # Implementation Requirements
///
/// - `get` must return the same `Arc` instance until `set` replaces it
/// - every `set` and `clear` must advance the revision seen by `subscribe`
/// - implementations must be usable from any thread
pub trait Store<K, T, E>: Send + Sync {
    /// Entry currently stored under `key`.
    fn get(&self, key: &K) -> Option<Arc<CacheEntry<T, E>>>;

    /// Store `entry` under `key`, or remove the key when `entry` is `None`.
    fn set(&self, key: K, entry: Option<Arc<CacheEntry<T, E>>>);

    /// Remove every entry.
    fn clear(&self);

    /// Subscribe to store revisions.
    fn subscribe(&self) -> StoreWatch;

    /// Remove the entry under `key`.
    fn remove(&self, key: &K)
    where
        K: Clone,
    {
        self.set(key.clone(), None);
    }
}

/// Change subscription on a store.
///
/// Carries a monotonically increasing revision number; the value itself is
/// informational, the notification is what bindings react to.
#[derive(Debug, Clone)]
pub struct StoreWatch {
    rx: watch::Receiver<u64>,
}

impl StoreWatch {
    /// Wrap a revision receiver.
    pub fn new(rx: watch::Receiver<u64>) -> Self {
        Self { rx }
    }

    /// Wait for the next revision. Returns false once the store stopped publishing.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// True if the store changed since the last observation.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Treat the current revision as observed.
    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }

    /// Latest revision.
    pub fn revision(&self) -> u64 {
        *self.rx.borrow()
    }
}
