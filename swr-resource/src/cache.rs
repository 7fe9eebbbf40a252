//! Cache facade.

use std::fmt;
use std::sync::Arc;
use swr_core::{CacheKey, CacheValue, SwrConfig, SwrResult};
use swr_storage::Store;

use crate::fetcher::FetchConfig;
use crate::metrics::ResourceMetrics;
use crate::plugin::Plugin;
use crate::resource::{Resource, ResourceOptions};

/// A store together with the options every binding on it shares.
///
/// Two `SwrCache` values over different stores are fully independent.
pub struct SwrCache<K, T, E> {
    store: Arc<dyn Store<K, T, E>>,
    options: ResourceOptions<K, T, E>,
}

impl<K, T, E> SwrCache<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: Store<K, T, E> + 'static,
    {
        Self {
            store,
            options: ResourceOptions::default(),
        }
    }

    /// Apply `config`, keeping the metrics and any plugins added so far.
    pub fn with_config(mut self, config: &SwrConfig) -> SwrResult<Self> {
        let derived = ResourceOptions::from_config(config)?;
        self.options.bootstrap = derived.bootstrap;
        self.options.plugins.extend(derived.plugins);
        Ok(self)
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin<K, T, E>>) -> Self {
        self.options.plugins.push(plugin);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store<K, T, E>> {
        &self.store
    }

    /// Counters shared by every binding created from this cache.
    pub fn metrics(&self) -> &Arc<ResourceMetrics> {
        &self.options.metrics
    }

    /// Bind a new consumer.
    pub fn bind(&self, config: Option<FetchConfig<K, T, E>>) -> SwrResult<Resource<K, T, E>> {
        Resource::bind_shared(Arc::clone(&self.store), config, self.options.clone())
    }
}

impl<K, T, E> fmt::Debug for SwrCache<K, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwrCache")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
