//! Keyed scope manager.
//!
//! One driver task per [`crate::Resource`]. The driver owns a tree of scopes
//! and rebuilds the parts of it whose inputs changed:
//!
//! ```text
//! resource (root)
//!   └── key            one per effective key
//!         └── entry    one per bound entry instance, holds the ownership claim
//!               └── ownership   one per exclusive episode, owns the handle and plugins
//!                     └── fetch  one per dispatched task
//! ```
//!
//! Each pass of the loop is a reconciliation against the latest
//! configuration, store contents and entry state. Running a pass with
//! unchanged inputs changes nothing.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use swr_core::{BootstrapMode, CacheKey, CacheValue, Scope};
use swr_storage::{CacheEntry, EntryWatch, Store};
use tokio::sync::watch;

use crate::arbiter::OwnershipClaim;
use crate::engine::FetchEngine;
use crate::fetcher::FetchConfig;
use crate::handle::ResourceHandle;
use crate::metrics::ResourceMetrics;
use crate::plugin::{Plugin, PluginContext};

pub(crate) type HandleSender<K, T, E> = watch::Sender<Option<ResourceHandle<K, T, E>>>;
pub(crate) type ConfigReceiver<K, T, E> = watch::Receiver<Option<FetchConfig<K, T, E>>>;

struct KeyScope<K, T, E> {
    config: FetchConfig<K, T, E>,
    scope: Scope,
    bound: Option<Bound<K, T, E>>,
}

struct Bound<K, T, E> {
    entry: Arc<CacheEntry<T, E>>,
    scope: Scope,
    claim: OwnershipClaim<T, E>,
    watch: EntryWatch<T, E>,
    conflicted: bool,
    episode: Option<Episode<K, T, E>>,
}

struct Episode<K, T, E> {
    scope: Scope,
    engine: FetchEngine<K, T, E>,
}

pub(crate) struct Binding<K, T, E> {
    store: Arc<dyn Store<K, T, E>>,
    root: Scope,
    bootstrap: BootstrapMode,
    plugins: Vec<Arc<dyn Plugin<K, T, E>>>,
    metrics: Arc<ResourceMetrics>,
    handle_tx: HandleSender<K, T, E>,
    active: Option<KeyScope<K, T, E>>,
}

impl<K, T, E> Binding<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    pub(crate) fn new(
        store: Arc<dyn Store<K, T, E>>,
        root: Scope,
        bootstrap: BootstrapMode,
        plugins: Vec<Arc<dyn Plugin<K, T, E>>>,
        metrics: Arc<ResourceMetrics>,
        handle_tx: HandleSender<K, T, E>,
    ) -> Self {
        Self {
            store,
            root,
            bootstrap,
            plugins,
            metrics,
            handle_tx,
            active: None,
        }
    }

    /// Drive the binding until the root scope stops or the configuration
    /// sender goes away.
    pub(crate) async fn run(mut self, mut config_rx: ConfigReceiver<K, T, E>) {
        let root = self.root.clone();
        let mut store_watch = self.store.subscribe();
        let mut store_live = true;

        loop {
            let config = config_rx.borrow_and_update().clone();
            store_watch.mark_seen();
            self.reconcile(config, &config_rx).await;
            if root.is_stopped() {
                break;
            }

            tokio::select! {
                biased;
                _ = root.stopped() => break,
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                alive = store_watch.changed(), if store_live => {
                    if !alive {
                        tracing::warn!("Store stopped publishing revisions");
                        store_live = false;
                    }
                }
                _ = self.entry_changed() => {}
            }
        }

        self.shutdown();
    }

    async fn entry_changed(&mut self) {
        let watch = self
            .active
            .as_mut()
            .and_then(|active| active.bound.as_mut())
            .map(|bound| &mut bound.watch);
        if let Some(watch) = watch {
            if watch.changed().await {
                return;
            }
        }
        std::future::pending::<()>().await
    }

    fn shutdown(&mut self) {
        self.root.stop();
        self.active = None;
        self.publish(None);
        tracing::debug!("Resource binding stopped");
    }

    fn publish(&self, handle: Option<ResourceHandle<K, T, E>>) {
        match handle {
            Some(handle) => {
                self.handle_tx.send_replace(Some(handle));
            }
            None => {
                self.handle_tx.send_if_modified(|current| current.take().is_some());
            }
        }
    }

    /// One reaction pass.
    async fn reconcile(
        &mut self,
        config: Option<FetchConfig<K, T, E>>,
        config_rx: &ConfigReceiver<K, T, E>,
    ) {
        self.switch_key(config);

        let Some(key) = self.active.as_ref().map(|a| a.config.key().clone()) else {
            return;
        };

        let current = self.store.get(&key);
        let unchanged = matches!(
            (&current, self.bound_entry()),
            (Some(current), Some(bound)) if Arc::ptr_eq(current, bound)
        );
        if !unchanged {
            self.unbind();
            let entry = match current {
                Some(entry) => entry,
                None => match self.bootstrap(&key, config_rx).await {
                    Some(entry) => entry,
                    None => return,
                },
            };
            self.bind(entry);
        }

        self.arbitrate();

        if let Some(episode) = self
            .active
            .as_mut()
            .and_then(|a| a.bound.as_mut())
            .and_then(|b| b.episode.as_mut())
        {
            episode.engine.evaluate();
        }
    }

    /// Tear down the previous key's scope before opening the next one.
    fn switch_key(&mut self, config: Option<FetchConfig<K, T, E>>) {
        let same_key = match (&self.active, &config) {
            (Some(active), Some(config)) => active.config.same_key(config),
            (None, None) => true,
            _ => false,
        };

        if same_key {
            if let (Some(active), Some(config)) = (self.active.as_mut(), config) {
                active.replace_config(config);
            }
            return;
        }

        let previous = self.active.take();
        if let Some(previous) = &previous {
            previous.scope.stop();
            self.publish(None);
        }
        ResourceMetrics::incr(&self.metrics.key_transitions);
        tracing::debug!(
            from = ?previous.as_ref().map(|p| p.config.key()),
            to = ?config.as_ref().map(|c| c.key()),
            "Key transition"
        );

        if let Some(config) = config {
            self.active = Some(KeyScope {
                config,
                scope: self.root.child("key"),
                bound: None,
            });
        }
    }

    fn bound_entry(&self) -> Option<&Arc<CacheEntry<T, E>>> {
        self.active
            .as_ref()
            .and_then(|a| a.bound.as_ref())
            .map(|b| &b.entry)
    }

    fn unbind(&mut self) {
        let Some(bound) = self.active.as_mut().and_then(|a| a.bound.take()) else {
            return;
        };
        bound.scope.stop();
        self.publish(None);
        tracing::debug!(entry_id = %bound.entry.id(), "Unbound from replaced entry");
    }

    /// Create the initial entry for `key` if the store still lacks one.
    async fn bootstrap(
        &self,
        key: &K,
        config_rx: &ConfigReceiver<K, T, E>,
    ) -> Option<Arc<CacheEntry<T, E>>> {
        if self.bootstrap == BootstrapMode::Deferred {
            tokio::task::yield_now().await;
            // A newer configuration or a stop wins over this pass.
            if self.root.is_stopped() || config_rx.has_changed().unwrap_or(true) {
                return None;
            }
            if let Some(existing) = self.store.get(key) {
                return Some(existing);
            }
        }

        let entry = Arc::new(CacheEntry::new());
        self.store.set(key.clone(), Some(Arc::clone(&entry)));
        tracing::debug!(key = ?key, entry_id = %entry.id(), "Initialised absent entry");
        Some(entry)
    }

    fn bind(&mut self, entry: Arc<CacheEntry<T, E>>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let scope = active.scope.child("entry");
        let watch = entry.subscribe();
        let claim = OwnershipClaim::acquire(Arc::clone(&entry));
        {
            let claim = claim.clone();
            scope.on_stop(move || {
                claim.release();
            });
        }
        tracing::debug!(key = ?active.config.key(), entry_id = %entry.id(), owners = claim.owners(), "Bound to entry");
        active.bound = Some(Bound {
            entry,
            scope,
            claim,
            watch,
            conflicted: false,
            episode: None,
        });
    }

    /// Start or end the ownership episode to match the claim's exclusivity.
    fn arbitrate(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(bound) = active.bound.as_mut() else {
            return;
        };
        bound.watch.mark_seen();

        let exclusive = bound.claim.is_exclusive();
        let owners = bound.claim.owners();

        if exclusive {
            bound.conflicted = false;
        } else if owners > 1 && !bound.conflicted {
            bound.conflicted = true;
            ResourceMetrics::incr(&self.metrics.ownership_conflicts);
            tracing::debug!(key = ?active.config.key(), owners, "Entry has multiple owners, suspending");
        }

        match (exclusive, bound.episode.is_some()) {
            (true, false) => {
                let scope = bound.scope.child("ownership");
                let handle = ResourceHandle::new(active.config.key().clone(), Arc::clone(&bound.entry), scope.clone());
                let engine = FetchEngine::new(
                    active.config.key().clone(),
                    Arc::clone(&bound.entry),
                    Arc::clone(&self.store),
                    scope.clone(),
                    active.config.fetcher(),
                    Arc::clone(&self.metrics),
                );
                bound.episode = Some(Episode {
                    scope: scope.clone(),
                    engine,
                });
                self.handle_tx.send_replace(Some(handle.clone()));
                tracing::debug!(key = ?active.config.key(), entry_id = %bound.entry.id(), "Ownership confirmed");

                for plugin in &self.plugins {
                    let ctx = PluginContext {
                        handle: handle.clone(),
                        key: active.config.key().clone(),
                        store: Arc::clone(&self.store),
                        scope: scope.clone(),
                    };
                    if catch_unwind(AssertUnwindSafe(|| plugin.setup(ctx))).is_err() {
                        tracing::warn!(plugin = plugin.name(), key = ?active.config.key(), "Plugin setup panicked");
                    }
                }
            }
            (false, true) => {
                if let Some(episode) = bound.episode.take() {
                    episode.scope.stop();
                }
                self.handle_tx
                    .send_if_modified(|current| current.take().is_some());
                tracing::debug!(key = ?active.config.key(), owners, "Ownership lost");
            }
            _ => {}
        }
    }
}

impl<K, T, E> KeyScope<K, T, E> {
    /// Adopt a configuration for the same key. Only the fetcher changes.
    fn replace_config(&mut self, config: FetchConfig<K, T, E>)
    where
        K: CacheKey,
        T: CacheValue,
        E: CacheValue,
    {
        if let Some(episode) = self.bound.as_mut().and_then(|b| b.episode.as_mut()) {
            episode.engine.set_fetcher(config.fetcher());
        }
        self.config = config;
    }
}
