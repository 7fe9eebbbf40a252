//! Ownership arbitration.
//!
//! Every binding that is attached to an entry holds one [`OwnershipClaim`]
//! on it. The entry's `owners` field counts live claims; a binding may drive
//! fetching only while its claim is the single one.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swr_storage::CacheEntry;

/// One binding's registration as an owner of a cache entry.
///
/// Clones share the same registration. The claim is released exactly once:
/// by [`OwnershipClaim::release`] or when the last clone is dropped.
pub struct OwnershipClaim<T, E> {
    inner: Arc<ClaimInner<T, E>>,
}

struct ClaimInner<T, E> {
    entry: Arc<CacheEntry<T, E>>,
    committed: AtomicBool,
}

impl<T, E> ClaimInner<T, E> {
    fn release(&self) -> bool {
        if !self.committed.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.entry.update(|state| {
            if state.owners == 0 {
                return false;
            }
            state.owners -= 1;
            true
        });
        true
    }
}

impl<T, E> Drop for ClaimInner<T, E> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T, E> OwnershipClaim<T, E> {
    /// Register as an owner of `entry`.
    pub fn acquire(entry: Arc<CacheEntry<T, E>>) -> Self {
        entry.update(|state| {
            state.owners = state.owners.saturating_add(1);
            true
        });
        Self {
            inner: Arc::new(ClaimInner {
                entry,
                committed: AtomicBool::new(true),
            }),
        }
    }

    /// Give up ownership. Returns false if the claim was already released.
    pub fn release(&self) -> bool {
        self.inner.release()
    }

    pub fn is_committed(&self) -> bool {
        self.inner.committed.load(Ordering::Acquire)
    }

    pub fn entry(&self) -> &Arc<CacheEntry<T, E>> {
        &self.inner.entry
    }

    /// Current owner count of the claimed entry.
    pub fn owners(&self) -> u32 {
        self.inner.entry.read(|state| state.owners)
    }

    /// True if this claim is committed and the only one on the entry.
    ///
    /// Whether the store still holds the entry is for the caller to check.
    pub fn is_exclusive(&self) -> bool {
        self.is_committed() && self.owners() == 1
    }
}

impl<T, E> Clone for OwnershipClaim<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for OwnershipClaim<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipClaim")
            .field("entry_id", &self.inner.entry.id())
            .field("committed", &self.is_committed())
            .field("owners", &self.owners())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    type Entry = CacheEntry<String, String>;

    #[test]
    fn test_single_claim_is_exclusive() {
        let entry = Arc::new(Entry::new());
        let claim = OwnershipClaim::acquire(Arc::clone(&entry));

        assert_eq!(entry.snapshot().owners, 1);
        assert!(claim.is_exclusive());
    }

    #[test]
    fn test_second_claim_breaks_exclusivity_for_both() {
        let entry = Arc::new(Entry::new());
        let first = OwnershipClaim::acquire(Arc::clone(&entry));
        let second = OwnershipClaim::acquire(Arc::clone(&entry));

        assert!(!first.is_exclusive());
        assert!(!second.is_exclusive());

        second.release();
        assert!(first.is_exclusive());
        assert!(!second.is_exclusive());
    }

    #[test]
    fn test_release_is_exactly_once() {
        let entry = Arc::new(Entry::new());
        let claim = OwnershipClaim::acquire(Arc::clone(&entry));
        let clone = claim.clone();

        assert!(claim.release());
        assert!(!clone.release());
        drop(claim);
        drop(clone);
        assert_eq!(entry.snapshot().owners, 0);
    }

    #[test]
    fn test_drop_releases() {
        let entry = Arc::new(Entry::new());
        {
            let _claim = OwnershipClaim::acquire(Arc::clone(&entry));
            assert_eq!(entry.snapshot().owners, 1);
        }
        assert_eq!(entry.snapshot().owners, 0);
    }

    #[test]
    fn test_release_never_underflows() {
        let entry = Arc::new(Entry::new());
        let claim = OwnershipClaim::acquire(Arc::clone(&entry));
        entry.update(|s| {
            s.owners = 0;
            true
        });

        assert!(claim.release());
        assert_eq!(entry.snapshot().owners, 0);
    }

    proptest! {
        /// Any interleaving of acquires and releases leaves `owners` equal
        /// to the number of claims still committed.
        #[test]
        fn prop_owner_count_tracks_live_claims(ops in prop::collection::vec(any::<(bool, usize)>(), 0..64)) {
            let entry = Arc::new(Entry::new());
            let mut claims: Vec<OwnershipClaim<String, String>> = Vec::new();

            for (acquire, index) in ops {
                if acquire || claims.is_empty() {
                    claims.push(OwnershipClaim::acquire(Arc::clone(&entry)));
                } else {
                    let pick = index % claims.len();
                    claims[pick].release();
                }
                let live = claims.iter().filter(|c| c.is_committed()).count() as u32;
                prop_assert_eq!(entry.snapshot().owners, live);
                prop_assert_eq!(claims.iter().any(|c| c.is_exclusive()), live == 1);
            }

            drop(claims);
            prop_assert_eq!(entry.snapshot().owners, 0);
        }
    }
}
