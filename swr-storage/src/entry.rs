//! Shared cache entry cell.
//!
//! A [`CacheEntry`] wraps an [`EntryState`] in a `tokio::sync::watch`
//! channel so that every binding can observe changes without polling. Next
//! to the state it tracks an `epoch` that advances on every in-place reset.
//! Work dispatched against an older epoch can no longer commit into the
//! entry.
//!
//! The mutators (`update`, `update_at`, `settle`, `reset_in_place`) belong to
//! the resource engine and are hidden from the docs. Consumers read entries
//! freely but change them only through a `ResourceHandle`, which checks that
//! the caller currently owns the entry.

use chrono::Utc;
use std::fmt;
use swr_core::{new_entry_id, EntryId, EntryState, Timestamp};
use tokio::sync::watch;

#[derive(Debug, Clone)]
struct Slot<T, E> {
    state: EntryState<T, E>,
    epoch: u64,
    settled_at: Option<Timestamp>,
}

/// Outcome of [`CacheEntry::settle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// The outcome was written into the entry.
    Applied,
    /// The entry was reset after the fetch was dispatched.
    Superseded,
    /// The caller's guard refused the commit.
    Rejected,
}

/// Observable cell holding one key's [`EntryState`].
///
/// Entries are shared behind `Arc` by the store and every binding. Identity
/// matters: a store that replaces the entry under a key with a new instance
/// invalidates all work dispatched against the old one.
pub struct CacheEntry<T, E> {
    id: EntryId,
    created_at: Timestamp,
    slot: watch::Sender<Slot<T, E>>,
}

impl<T, E> Default for CacheEntry<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> CacheEntry<T, E> {
    /// Create an entry in the initial state.
    pub fn new() -> Self {
        Self::with_state(EntryState::initial())
    }

    /// Create an entry seeded with `state`.
    pub fn with_state(state: EntryState<T, E>) -> Self {
        let (slot, _) = watch::channel(Slot {
            state,
            epoch: 0,
            settled_at: None,
        });
        Self {
            id: new_entry_id(),
            created_at: Utc::now(),
            slot,
        }
    }

    /// Identity of this instance.
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// When this instance was created.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Current epoch. Advances on every [`CacheEntry::reset_in_place`].
    pub fn epoch(&self) -> u64 {
        self.slot.borrow().epoch
    }

    /// When a fetch outcome was last committed in the current epoch.
    pub fn settled_at(&self) -> Option<Timestamp> {
        self.slot.borrow().settled_at
    }

    /// Read the state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&EntryState<T, E>) -> R) -> R {
        f(&self.slot.borrow().state)
    }

    /// Read the state together with the epoch it belongs to.
    pub fn inspect<R>(&self, f: impl FnOnce(&EntryState<T, E>, u64) -> R) -> R {
        let slot = self.slot.borrow();
        f(&slot.state, slot.epoch)
    }

    /// Subscribe to changes of this entry.
    pub fn subscribe(&self) -> EntryWatch<T, E> {
        EntryWatch {
            rx: self.slot.subscribe(),
        }
    }

    /// Mutate the state. Watchers are notified only if `f` returns true.
    ///
    /// Engine-only.
    #[doc(hidden)]
    pub fn update(&self, f: impl FnOnce(&mut EntryState<T, E>) -> bool) -> bool {
        self.slot.send_if_modified(|slot| f(&mut slot.state))
    }

    /// Like [`CacheEntry::update`], but only while the entry is still on `epoch`.
    #[doc(hidden)]
    pub fn update_at(&self, epoch: u64, f: impl FnOnce(&mut EntryState<T, E>) -> bool) -> bool {
        self.slot
            .send_if_modified(|slot| slot.epoch == epoch && f(&mut slot.state))
    }

    /// Commit a fetch outcome dispatched at `epoch`.
    ///
    /// `still_current` is evaluated under the entry's lock, after the epoch
    /// check, and must return false if the dispatching task was cancelled.
    #[doc(hidden)]
    pub fn settle<F>(&self, epoch: u64, outcome: Result<T, E>, still_current: F) -> Settle
    where
        F: FnOnce() -> bool,
    {
        let mut verdict = Settle::Superseded;
        self.slot.send_if_modified(|slot| {
            if slot.epoch != epoch {
                return false;
            }
            if !still_current() {
                verdict = Settle::Rejected;
                return false;
            }
            slot.state.settle(outcome);
            slot.settled_at = Some(Utc::now());
            verdict = Settle::Applied;
            true
        });
        verdict
    }

    /// Replace the state with the initial state, keeping the owner count,
    /// and start a new epoch. Returns the new epoch. Engine-only.
    #[doc(hidden)]
    pub fn reset_in_place(&self) -> u64 {
        let mut epoch = 0;
        self.slot.send_modify(|slot| {
            slot.state.reset_keep_owners();
            slot.epoch += 1;
            slot.settled_at = None;
            epoch = slot.epoch;
        });
        epoch
    }
}

impl<T: Clone, E: Clone> CacheEntry<T, E> {
    /// Clone the current state.
    pub fn snapshot(&self) -> EntryState<T, E> {
        self.slot.borrow().state.clone()
    }
}

impl<T, E> fmt::Debug for CacheEntry<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.borrow();
        f.debug_struct("CacheEntry")
            .field("id", &self.id)
            .field("epoch", &slot.epoch)
            .field("phase", &slot.state.phase())
            .field("owners", &slot.state.owners)
            .field("has_data", &slot.state.data.is_some())
            .field("has_error", &slot.state.error.is_some())
            .finish()
    }
}

// ============================================================================
// ENTRY WATCH
// ============================================================================

/// Change subscription on one [`CacheEntry`].
pub struct EntryWatch<T, E> {
    rx: watch::Receiver<Slot<T, E>>,
}

impl<T, E> Clone for EntryWatch<T, E> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T, E> EntryWatch<T, E> {
    /// Wait for the next change. Returns false once the entry is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// True if a change happened since the last observation.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Treat the current value as observed.
    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }

    /// Epoch of the current value.
    pub fn epoch(&self) -> u64 {
        self.rx.borrow().epoch
    }
}

impl<T: Clone, E: Clone> EntryWatch<T, E> {
    /// Clone the current state.
    pub fn snapshot(&self) -> EntryState<T, E> {
        self.rx.borrow().state.clone()
    }

    /// Wait until `f` holds for the state, and return that state.
    ///
    /// Returns `None` if the entry is dropped first.
    pub async fn wait_for<F>(&mut self, mut f: F) -> Option<EntryState<T, E>>
    where
        F: FnMut(&EntryState<T, E>) -> bool,
    {
        self.rx
            .wait_for(|slot| f(&slot.state))
            .await
            .ok()
            .map(|slot| slot.state.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Entry = CacheEntry<String, String>;

    #[test]
    fn test_new_entry_is_initial() {
        let entry = Entry::new();
        assert_eq!(entry.snapshot(), EntryState::initial());
        assert_eq!(entry.epoch(), 0);
        assert!(entry.settled_at().is_none());
        assert_ne!(entry.id(), Entry::new().id());
    }

    #[test]
    fn test_update_notifies_only_when_modified() {
        let entry = Entry::new();
        let mut watch = entry.subscribe();

        assert!(!entry.update(|_| false));
        assert!(!watch.has_changed());

        assert!(entry.update(|s| {
            s.owners += 1;
            true
        }));
        assert!(watch.has_changed());
        watch.mark_seen();
        assert!(!watch.has_changed());
        assert_eq!(watch.snapshot().owners, 1);
    }

    #[test]
    fn test_reset_in_place_keeps_owners_and_bumps_epoch() {
        let entry = Entry::new();
        entry.update(|s| {
            s.owners = 1;
            s.settle_ok("v1".to_string());
            true
        });

        let epoch = entry.reset_in_place();
        assert_eq!(epoch, 1);
        assert_eq!(entry.epoch(), 1);

        let state = entry.snapshot();
        assert_eq!(state.owners, 1);
        assert!(state.data.is_none());
        assert!(state.is_due());
    }

    #[test]
    fn test_update_at_rejects_old_epoch() {
        let entry = Entry::new();
        entry.reset_in_place();

        assert!(!entry.update_at(0, |s| {
            s.pending = true;
            true
        }));
        assert!(!entry.snapshot().pending);
        assert!(entry.update_at(1, |s| {
            s.pending = true;
            true
        }));
    }

    #[test]
    fn test_settle_applies_on_current_epoch() {
        let entry = Entry::new();
        entry.update(|s| {
            s.pending = true;
            true
        });

        assert_eq!(entry.settle(0, Ok("v1".to_string()), || true), Settle::Applied);
        let state = entry.snapshot();
        assert_eq!(state.data.as_deref(), Some("v1"));
        assert!(state.fresh);
        assert!(!state.pending);
        assert!(entry.settled_at().is_some());
    }

    #[test]
    fn test_settle_after_reset_is_superseded() {
        let entry = Entry::new();
        entry.reset_in_place();

        let verdict = entry.settle(0, Err("late".to_string()), || true);
        assert_eq!(verdict, Settle::Superseded);
        assert!(entry.snapshot().error.is_none());
    }

    #[test]
    fn test_settle_rejected_by_guard() {
        let entry = Entry::new();
        let mut watch = entry.subscribe();

        let verdict = entry.settle(0, Ok("cancelled".to_string()), || false);
        assert_eq!(verdict, Settle::Rejected);
        assert!(entry.snapshot().data.is_none());
        assert!(!watch.has_changed());
        watch.mark_seen();
    }

    #[tokio::test]
    async fn test_wait_for_sees_later_update() {
        let entry = std::sync::Arc::new(Entry::new());
        let mut watch = entry.subscribe();
        let writer = std::sync::Arc::clone(&entry);

        tokio::spawn(async move {
            writer.update(|s| {
                s.settle_ok("v1".to_string());
                true
            });
        });

        let state = tokio::time::timeout(Duration::from_secs(1), watch.wait_for(|s| s.fresh))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.data.as_deref(), Some("v1"));
    }
}
