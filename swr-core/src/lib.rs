//! SWR Core - Entry Types, Errors and Cancellation Scopes
//!
//! Pure data structures and contracts shared by every other crate:
//! the per-key cache entry state, the error taxonomy, configuration, and the
//! hierarchical cancellation scopes that bound all asynchronous work.
//! This crate contains no fetch logic.

pub mod config;
pub mod entry;
pub mod error;
pub mod identity;
pub mod scope;

pub use config::{BootstrapMode, RetryConfig, SwrConfig};
pub use entry::{EntryPhase, EntryState};
pub use error::{ConfigError, ScopeError, StoreError, SwrError, SwrResult};
pub use identity::{new_entry_id, EntryId, Timestamp};
pub use scope::{AbortSignal, Scope};

use std::fmt::Debug;
use std::hash::Hash;

// ============================================================================
// BOUNDS
// ============================================================================

/// Bound for cache keys.
///
/// Keys are compared for equality on every reaction, hashed by stores, and
/// logged as structured fields.
pub trait CacheKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<K> CacheKey for K where K: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bound for fetched values and fetch errors held in a cache entry.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<V> CacheValue for V where V: Clone + Send + Sync + 'static {}
