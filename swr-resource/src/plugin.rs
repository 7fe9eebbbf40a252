//! Plugin hook.
//!
//! Plugins add auxiliary behaviour to a binding without reaching into the
//! fetch engine. [`Plugin::setup`] runs once at the start of every ownership
//! episode; everything a plugin starts through its [`PluginContext`] stops
//! when that episode ends.

use std::future::Future;
use std::sync::Arc;
use swr_core::{CacheKey, CacheValue, Scope};
use swr_storage::Store;

use crate::handle::ResourceHandle;

/// Auxiliary behaviour attached to resource bindings.
pub trait Plugin<K, T, E>: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Called when a binding becomes the exclusive owner of its entry.
    fn setup(&self, ctx: PluginContext<K, T, E>);
}

/// What a plugin gets to see of one ownership episode.
pub struct PluginContext<K, T, E> {
    pub handle: ResourceHandle<K, T, E>,
    pub key: K,
    pub store: Arc<dyn Store<K, T, E>>,
    pub scope: Scope,
}

impl<K, T, E> PluginContext<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    /// Run `work` until it finishes or the episode ends, whichever is first.
    pub fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let scope = self.scope.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = scope.stopped() => {}
                _ = work => {}
            }
        });
    }
}
