//! SWR Resource - Resource Lifecycle Engine
//!
//! Binds consumers to keys of a [`swr_storage::Store`] and keeps the cache
//! entry for each key revalidated:
//!
//! - the keyed scope manager follows the configuration's key and tears down
//!   all work of the previous key before activating the next one
//! - the ownership arbiter lets exactly one consumer drive fetching per entry
//! - the fetch engine runs cancellable fetches and commits results only into
//!   the entry instance and epoch they were dispatched against
//! - the [`ResourceHandle`] exposes the entry plus `mark_stale`/`reset`
//!
//! ```ignore
//! let store = AmnesiaStore::shared();
//! let resource = Resource::bind(
//!     store,
//!     Some(FetchConfig::from_fn("user:1", |_signal| async { Ok::<_, String>(42) })),
//! )?;
//! let handle = resource.wait_for_handle().await;
//! ```

pub mod arbiter;
mod binding;
pub mod cache;
mod engine;
pub mod fetcher;
pub mod handle;
pub mod metrics;
pub mod plugin;
pub mod resource;
pub mod retry;

pub use arbiter::OwnershipClaim;
pub use cache::SwrCache;
pub use fetcher::{FetchConfig, Fetcher, FnFetcher};
pub use handle::ResourceHandle;
pub use metrics::{MetricsSnapshot, ResourceMetrics};
pub use plugin::{Plugin, PluginContext};
pub use resource::{Resource, ResourceOptions};
pub use retry::RetryOnError;

// Re-exported so consumers can depend on this crate alone.
pub use swr_core::{AbortSignal, BootstrapMode, EntryState, RetryConfig, SwrConfig, SwrError, SwrResult};
pub use swr_storage::{AmnesiaStore, CacheEntry, EntryWatch, Store};
