//! Cache entry state
//!
//! The per-key record shared by every consumer bound to a key. This module
//! only defines the data and its pure transitions; who may apply them, and
//! when, is decided by the resource engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one cache entry.
///
/// `data` and `error` are not mutually exclusive: a failed refresh keeps the
/// previously fetched `data` and records the `error` next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryState<T, E> {
    /// Last successfully fetched value.
    pub data: Option<T>,
    /// Last fetch failure.
    pub error: Option<E>,
    /// A fetch is in flight for this entry.
    pub pending: bool,
    /// `data`/`error` reflect the current desired state. False means revalidation is due.
    pub fresh: bool,
    /// Number of live consumers bound to this entry.
    pub owners: u32,
}

impl<T, E> Default for EntryState<T, E> {
    fn default() -> Self {
        Self::initial()
    }
}

impl<T, E> EntryState<T, E> {
    /// The initial (and reset) state: no data, no error, idle and stale, unowned.
    pub fn initial() -> Self {
        Self {
            data: None,
            error: None,
            pending: false,
            fresh: false,
            owners: 0,
        }
    }

    /// True when a fetch must be started: not pending and not fresh.
    pub fn is_due(&self) -> bool {
        !self.pending && !self.fresh
    }

    /// Coarse lifecycle phase, mostly for diagnostics.
    pub fn phase(&self) -> EntryPhase {
        if self.pending {
            EntryPhase::Pending
        } else if self.fresh {
            EntryPhase::Fresh
        } else {
            EntryPhase::Stale
        }
    }

    /// Commit a successful fetch.
    pub fn settle_ok(&mut self, value: T) {
        self.data = Some(value);
        self.error = None;
        self.fresh = true;
        self.pending = false;
    }

    /// Commit a failed fetch. `data` is left untouched.
    pub fn settle_err(&mut self, error: E) {
        self.error = Some(error);
        self.fresh = true;
        self.pending = false;
    }

    /// Commit either outcome of a fetch.
    pub fn settle(&mut self, outcome: Result<T, E>) {
        match outcome {
            Ok(value) => self.settle_ok(value),
            Err(error) => self.settle_err(error),
        }
    }

    /// Flag the entry for revalidation. Returns true if anything changed.
    pub fn mark_stale(&mut self) -> bool {
        let changed = self.fresh;
        self.fresh = false;
        changed
    }

    /// Return to the initial state, keeping the owner count.
    pub fn reset_keep_owners(&mut self) {
        let owners = self.owners;
        *self = Self::initial();
        self.owners = owners;
    }
}

/// Coarse lifecycle phase of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryPhase {
    /// Revalidation is due and nothing is in flight.
    Stale,
    /// A fetch is in flight.
    Pending,
    /// Data/error are current.
    Fresh,
}

impl fmt::Display for EntryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntryPhase::Stale => "stale",
            EntryPhase::Pending => "pending",
            EntryPhase::Fresh => "fresh",
        };
        f.write_str(label)
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
