//! SWR Storage - Cache Entries and Pluggable Stores
//!
//! Defines the shared, observable [`CacheEntry`] cell and the [`Store`]
//! abstraction mapping keys to entries. The default store,
//! [`AmnesiaStore`], keeps everything in memory and persists nothing.
//!
//! Stores are injected into every binding; there is no global store.

pub mod amnesia;
pub mod entry;
pub mod store;

pub use amnesia::AmnesiaStore;
pub use entry::{CacheEntry, EntryWatch, Settle};
pub use store::{Store, StoreWatch};
