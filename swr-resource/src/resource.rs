//! Consumer-side resource object.

use std::fmt;
use std::sync::Arc;
use swr_core::{BootstrapMode, CacheKey, CacheValue, Scope, ScopeError, SwrConfig, SwrResult};
use swr_storage::Store;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::binding::Binding;
use crate::fetcher::FetchConfig;
use crate::handle::ResourceHandle;
use crate::metrics::ResourceMetrics;
use crate::plugin::Plugin;
use crate::retry::RetryOnError;

// ============================================================================
// OPTIONS
// ============================================================================

/// Per-binding settings.
pub struct ResourceOptions<K, T, E> {
    pub bootstrap: BootstrapMode,
    pub plugins: Vec<Arc<dyn Plugin<K, T, E>>>,
    pub metrics: Arc<ResourceMetrics>,
}

impl<K, T, E> Default for ResourceOptions<K, T, E> {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapMode::default(),
            plugins: Vec::new(),
            metrics: Arc::new(ResourceMetrics::new()),
        }
    }
}

impl<K, T, E> Clone for ResourceOptions<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            bootstrap: self.bootstrap,
            plugins: self.plugins.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<K, T, E> ResourceOptions<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    /// Options derived from a validated [`SwrConfig`].
    ///
    /// A configured retry section installs the [`RetryOnError`] plugin.
    pub fn from_config(config: &SwrConfig) -> SwrResult<Self> {
        config.validate()?;
        let mut options = Self {
            bootstrap: config.bootstrap,
            ..Self::default()
        };
        if let Some(retry) = &config.retry {
            options.plugins.push(Arc::new(RetryOnError::new(retry.clone())));
        }
        Ok(options)
    }

    pub fn with_bootstrap(mut self, bootstrap: BootstrapMode) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin<K, T, E>>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ResourceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl<K, T, E> fmt::Debug for ResourceOptions<K, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("ResourceOptions")
            .field("bootstrap", &self.bootstrap)
            .field("plugins", &plugins)
            .finish()
    }
}

// ============================================================================
// RESOURCE
// ============================================================================

/// A consumer bound to one (changeable) key of a store.
///
/// The binding runs on a background task. [`Resource::handle`] is `Some`
/// only while this consumer exclusively owns the entry for its key.
///
/// Dropping a `Resource` stops it: its fetch is aborted and its ownership
/// released before `drop` returns.
pub struct Resource<K, T, E> {
    config_tx: watch::Sender<Option<FetchConfig<K, T, E>>>,
    handle_rx: watch::Receiver<Option<ResourceHandle<K, T, E>>>,
    root: Scope,
    driver: Option<JoinHandle<()>>,
}

impl<K, T, E> Resource<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    /// Bind to `store` with default options.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind<S>(store: Arc<S>, config: Option<FetchConfig<K, T, E>>) -> SwrResult<Self>
    where
        S: Store<K, T, E> + 'static,
    {
        Self::bind_with(store, config, ResourceOptions::default())
    }

    /// Bind to `store` with explicit options.
    pub fn bind_with<S>(
        store: Arc<S>,
        config: Option<FetchConfig<K, T, E>>,
        options: ResourceOptions<K, T, E>,
    ) -> SwrResult<Self>
    where
        S: Store<K, T, E> + 'static,
    {
        Self::bind_shared(store, config, options)
    }

    /// Bind to an already type-erased store.
    pub fn bind_shared(
        store: Arc<dyn Store<K, T, E>>,
        config: Option<FetchConfig<K, T, E>>,
        options: ResourceOptions<K, T, E>,
    ) -> SwrResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ScopeError::RuntimeUnavailable {
                reason: e.to_string(),
            }
        })?;

        let root = Scope::root("resource");
        let (config_tx, config_rx) = watch::channel(config);
        let (handle_tx, handle_rx) = watch::channel(None);

        let binding = Binding::new(
            store,
            root.clone(),
            options.bootstrap,
            options.plugins,
            options.metrics,
            handle_tx,
        );
        let driver = runtime.spawn(binding.run(config_rx));

        Ok(Self {
            config_tx,
            handle_rx,
            root,
            driver: Some(driver),
        })
    }

    /// Replace the fetch configuration.
    ///
    /// A configuration with the same key as the current one only swaps the
    /// fetcher. `None` unbinds.
    pub fn set_config(&self, config: Option<FetchConfig<K, T, E>>) -> SwrResult<()> {
        if self.root.is_stopped() {
            return Err(ScopeError::Stopped {
                scope: self.root.label().to_string(),
            }
            .into());
        }
        self.config_tx.send_replace(config);
        Ok(())
    }

    /// Current key, if any.
    pub fn key(&self) -> Option<K> {
        self.config_tx.borrow().as_ref().map(|c| c.key().clone())
    }

    /// Handle of the current ownership episode, if this consumer is the
    /// exclusive owner right now.
    pub fn handle(&self) -> Option<ResourceHandle<K, T, E>> {
        self.handle_rx
            .borrow()
            .as_ref()
            .filter(|h| h.is_live())
            .cloned()
    }

    /// Subscribe to handle changes.
    pub fn watch_handle(&self) -> watch::Receiver<Option<ResourceHandle<K, T, E>>> {
        self.handle_rx.clone()
    }

    /// Wait until a live handle is published. Returns `None` if the
    /// binding stops first.
    pub async fn wait_for_handle(&self) -> Option<ResourceHandle<K, T, E>> {
        let mut rx = self.handle_rx.clone();
        let handle = rx
            .wait_for(|h| h.as_ref().is_some_and(|h| h.is_live()))
            .await
            .ok()?
            .clone();
        handle
    }

    pub fn is_stopped(&self) -> bool {
        self.root.is_stopped()
    }

    /// Stop the binding and wait for its driver task to exit.
    pub async fn stop(mut self) {
        self.root.stop();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                tracing::warn!(error = %e, "Resource driver task failed");
            }
        }
    }
}

impl<K, T, E> Drop for Resource<K, T, E> {
    fn drop(&mut self) {
        self.root.stop();
    }
}

impl<K: fmt::Debug, T, E> fmt::Debug for Resource<K, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("key", &self.config_tx.borrow().as_ref().map(|c| c.key()))
            .field("stopped", &self.root.is_stopped())
            .finish()
    }
}
