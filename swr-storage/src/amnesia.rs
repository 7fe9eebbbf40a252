//! In-memory store with no persistence.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use swr_core::{CacheKey, CacheValue, StoreError};
use tokio::sync::watch;

use crate::entry::CacheEntry;
use crate::store::{Store, StoreWatch};

/// Default store: a hash map behind a lock, forgotten when dropped.
pub struct AmnesiaStore<K, T, E> {
    entries: RwLock<HashMap<K, Arc<CacheEntry<T, E>>>>,
    revision: watch::Sender<u64>,
}

impl<K, T, E> Default for AmnesiaStore<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T, E> AmnesiaStore<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    /// Create an empty store.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            entries: RwLock::new(HashMap::new()),
            revision,
        }
    }

    /// Create an empty store behind an `Arc`, ready to be shared by bindings.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    /// True if no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Keys currently stored, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.read_entries().keys().cloned().collect()
    }

    /// Current revision number.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<K, Arc<CacheEntry<T, E>>>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            tracing::warn!(error = %StoreError::LockPoisoned, "Recovering store read lock");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<K, Arc<CacheEntry<T, E>>>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!(error = %StoreError::LockPoisoned, "Recovering store write lock");
            PoisonError::into_inner(poisoned)
        })
    }
}

impl<K, T, E> Store<K, T, E> for AmnesiaStore<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    fn get(&self, key: &K) -> Option<Arc<CacheEntry<T, E>>> {
        self.read_entries().get(key).cloned()
    }

    fn set(&self, key: K, entry: Option<Arc<CacheEntry<T, E>>>) {
        {
            let mut entries = self.write_entries();
            match entry {
                Some(entry) => {
                    entries.insert(key, entry);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        self.bump();
    }

    fn clear(&self) {
        self.write_entries().clear();
        self.bump();
    }

    fn subscribe(&self) -> StoreWatch {
        StoreWatch::new(self.revision.subscribe())
    }
}

impl<K, T, E> fmt::Debug for AmnesiaStore<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmnesiaStore")
            .field("entries", &self.len())
            .field("revision", &self.revision())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
