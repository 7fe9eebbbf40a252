//! Consumer-facing resource handle.

use std::fmt;
use std::sync::Arc;
use swr_core::{EntryId, EntryState, Scope};
use swr_storage::{CacheEntry, EntryWatch};

/// View over the entry a binding exclusively owns.
///
/// A handle is tied to one ownership episode. It exposes the entry read-only
/// plus the [`ResourceHandle::mark_stale`] and [`ResourceHandle::reset`]
/// commands. When the episode ends (ownership lost, key changed, binding
/// stopped) the handle goes dead: reads still work, commands do nothing.
pub struct ResourceHandle<K, T, E> {
    key: K,
    entry: Arc<CacheEntry<T, E>>,
    episode: Scope,
}

impl<K, T, E> ResourceHandle<K, T, E>
where
    K: fmt::Debug,
    T: Clone,
    E: Clone,
{
    pub(crate) fn new(key: K, entry: Arc<CacheEntry<T, E>>, episode: Scope) -> Self {
        Self {
            key,
            entry,
            episode,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn entry_id(&self) -> EntryId {
        self.entry.id()
    }

    /// Snapshot of the whole entry.
    pub fn state(&self) -> EntryState<T, E> {
        self.entry.snapshot()
    }

    pub fn data(&self) -> Option<T> {
        self.entry.read(|s| s.data.clone())
    }

    pub fn error(&self) -> Option<E> {
        self.entry.read(|s| s.error.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.entry.read(|s| s.pending)
    }

    pub fn is_fresh(&self) -> bool {
        self.entry.read(|s| s.fresh)
    }

    pub fn owners(&self) -> u32 {
        self.entry.read(|s| s.owners)
    }

    /// Subscribe to changes of the underlying entry.
    pub fn watch(&self) -> EntryWatch<T, E> {
        self.entry.subscribe()
    }

    /// True while the ownership episode this handle belongs to is running.
    pub fn is_live(&self) -> bool {
        !self.episode.is_stopped()
    }

    /// Flag the entry for revalidation, keeping `data` and `error` visible.
    ///
    /// Returns true if the entry changed. A no-op on a dead handle.
    pub fn mark_stale(&self) -> bool {
        if !self.is_live() {
            tracing::debug!(key = ?self.key, "mark_stale on released handle ignored");
            return false;
        }
        self.entry.update(|s| s.mark_stale())
    }

    /// Return the entry to the initial state. `owners` is kept.
    ///
    /// Any fetch still in flight for the entry is superseded. Returns false
    /// on a dead handle.
    pub fn reset(&self) -> bool {
        if !self.is_live() {
            tracing::debug!(key = ?self.key, "reset on released handle ignored");
            return false;
        }
        let epoch = self.entry.reset_in_place();
        tracing::debug!(key = ?self.key, entry_id = %self.entry.id(), epoch, "Entry reset");
        true
    }
}

impl<K: Clone, T, E> Clone for ResourceHandle<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            entry: Arc::clone(&self.entry),
            episode: self.episode.clone(),
        }
    }
}

impl<K: fmt::Debug, T, E> fmt::Debug for ResourceHandle<K, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("key", &self.key)
            .field("entry", &self.entry)
            .field("live", &!self.episode.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ResourceHandle<&'static str, String, String>, Scope) {
        let episode = Scope::root("ownership");
        let entry = Arc::new(CacheEntry::new());
        entry.update(|s| {
            s.owners = 1;
            s.settle_ok("v1".to_string());
            true
        });
        (ResourceHandle::new("k", entry, episode.clone()), episode)
    }

    #[test]
    fn test_mark_stale_keeps_data() {
        let (handle, _episode) = handle();

        assert!(handle.mark_stale());
        assert!(!handle.mark_stale());
        assert_eq!(handle.data().as_deref(), Some("v1"));
        assert!(!handle.is_fresh());
        assert!(!handle.is_pending());
    }

    #[test]
    fn test_reset_keeps_owners() {
        let (handle, _episode) = handle();

        assert!(handle.reset());
        let state = handle.state();
        assert_eq!(state.data, None);
        assert_eq!(state.owners, 1);
        assert!(state.is_due());
    }

    #[test]
    fn test_dead_handle_ignores_commands() {
        let (handle, episode) = handle();
        episode.stop();

        assert!(!handle.is_live());
        assert!(!handle.mark_stale());
        assert!(!handle.reset());
        assert!(handle.is_fresh());
        assert_eq!(handle.data().as_deref(), Some("v1"));
    }
}
