//! Fetch task engine.
//!
//! Runs only inside an ownership episode. On every evaluation it compares
//! the entry against its own bookkeeping and either stays idle or replaces
//! the current task:
//!
//! ```text
//! evaluate()
//!   ├── current task on an older epoch   → abort it
//!   ├── entry fresh or pending           → idle
//!   └── entry due                        → abort current, dispatch new
//! ```
//!
//! A task commits only if, under the entry's lock, its signal is not
//! aborted, the store still holds the entry it was dispatched against, and
//! the entry is still on the dispatched epoch. Anything else is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swr_core::{AbortSignal, CacheKey, CacheValue, Scope};
use swr_storage::{CacheEntry, Settle, Store};

use crate::fetcher::Fetcher;
use crate::metrics::ResourceMetrics;

struct InFlight {
    scope: Scope,
    epoch: u64,
}

pub(crate) struct FetchEngine<K, T, E> {
    key: K,
    entry: Arc<CacheEntry<T, E>>,
    store: Arc<dyn Store<K, T, E>>,
    scope: Scope,
    fetcher: Arc<dyn Fetcher<T, E>>,
    metrics: Arc<ResourceMetrics>,
    current: Option<InFlight>,
}

impl<K, T, E> FetchEngine<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    pub(crate) fn new(
        key: K,
        entry: Arc<CacheEntry<T, E>>,
        store: Arc<dyn Store<K, T, E>>,
        scope: Scope,
        fetcher: Arc<dyn Fetcher<T, E>>,
        metrics: Arc<ResourceMetrics>,
    ) -> Self {
        Self {
            key,
            entry,
            store,
            scope,
            fetcher,
            metrics,
            current: None,
        }
    }

    /// Use `fetcher` for future dispatches. The running task is left alone.
    pub(crate) fn set_fetcher(&mut self, fetcher: Arc<dyn Fetcher<T, E>>) {
        self.fetcher = fetcher;
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|t| t.scope.is_active())
    }

    /// React to the entry's current state.
    pub(crate) fn evaluate(&mut self) {
        if self.scope.is_stopped() {
            return;
        }
        let (due, epoch) = self.entry.inspect(|state, epoch| (state.is_due(), epoch));

        let outdated = self
            .current
            .as_ref()
            .is_some_and(|t| !t.scope.is_active() || t.epoch != epoch);
        if outdated {
            if let Some(task) = self.current.take() {
                self.abort(task);
            }
        }

        if !due {
            tracing::trace!(key = ?self.key, epoch, "Entry not due, engine idle");
            return;
        }

        if let Some(task) = self.current.take() {
            self.abort(task);
        }
        self.dispatch(epoch);
    }

    fn abort(&self, task: InFlight) {
        if task.scope.stop() {
            tracing::debug!(key = ?self.key, epoch = task.epoch, "Fetch aborted");
        }
    }

    fn dispatch(&mut self, epoch: u64) {
        let started = self.entry.update_at(epoch, |state| {
            if !state.is_due() {
                return false;
            }
            state.pending = true;
            true
        });
        if !started {
            return;
        }

        let task_scope = self.scope.child("fetch");
        let armed = Arc::new(AtomicBool::new(true));
        {
            // Aborting an unsettled task hands `pending` back so the next trigger can fire.
            let entry = Arc::clone(&self.entry);
            let armed = Arc::clone(&armed);
            task_scope.on_stop(move || release_pending(&entry, epoch, &armed));
        }

        ResourceMetrics::incr(&self.metrics.fetches_started);
        tracing::debug!(
            key = ?self.key,
            entry_id = %self.entry.id(),
            epoch,
            "Fetch started"
        );

        let task = FetchTask {
            key: self.key.clone(),
            entry: Arc::clone(&self.entry),
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
            signal: task_scope.signal(),
            armed,
            epoch,
        };
        let fetcher = Arc::clone(&self.fetcher);
        let scope = task_scope.clone();
        tokio::spawn(async move {
            task.run(fetcher).await;
            // Aborted tasks were stopped already; this only settles finished ones.
            scope.complete();
        });

        self.current = Some(InFlight {
            scope: task_scope,
            epoch,
        });
    }
}

/// Clear `pending` for `epoch` unless the task already committed.
fn release_pending<T, E>(entry: &CacheEntry<T, E>, epoch: u64, armed: &AtomicBool)
where
    T: CacheValue,
    E: CacheValue,
{
    entry.update_at(epoch, |state| {
        if !armed.swap(false, Ordering::AcqRel) || !state.pending {
            return false;
        }
        state.pending = false;
        true
    });
}

struct FetchTask<K, T, E> {
    key: K,
    entry: Arc<CacheEntry<T, E>>,
    store: Arc<dyn Store<K, T, E>>,
    metrics: Arc<ResourceMetrics>,
    signal: AbortSignal,
    armed: Arc<AtomicBool>,
    epoch: u64,
}

impl<K, T, E> FetchTask<K, T, E>
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    async fn run(self, fetcher: Arc<dyn Fetcher<T, E>>) {
        let outcome = tokio::select! {
            biased;
            _ = self.signal.aborted() => None,
            result = fetcher.fetch(self.signal.clone()) => Some(result),
        };

        match outcome {
            Some(result) => {
                self.commit(result);
                // A discarded result still hands `pending` back.
                release_pending(&self.entry, self.epoch, &self.armed);
            }
            None => {
                ResourceMetrics::incr(&self.metrics.fetches_cancelled);
                tracing::debug!(key = ?self.key, epoch = self.epoch, "Fetch cancelled");
            }
        }
    }

    fn commit(&self, result: Result<T, E>) {
        let succeeded = result.is_ok();
        let mut replaced = false;

        let verdict = self.entry.settle(self.epoch, result, || {
            if self.signal.is_aborted() {
                return false;
            }
            let held = self
                .store
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(&current, &self.entry));
            if !held {
                replaced = true;
                return false;
            }
            self.armed.store(false, Ordering::Release);
            true
        });

        match verdict {
            Settle::Applied if succeeded => {
                ResourceMetrics::incr(&self.metrics.fetches_succeeded);
                tracing::debug!(key = ?self.key, epoch = self.epoch, "Fetch committed");
            }
            Settle::Applied => {
                ResourceMetrics::incr(&self.metrics.fetches_failed);
                tracing::debug!(key = ?self.key, epoch = self.epoch, "Fetch error committed");
            }
            Settle::Rejected if replaced => {
                ResourceMetrics::incr(&self.metrics.results_discarded);
                tracing::debug!(
                    key = ?self.key,
                    entry_id = %self.entry.id(),
                    "Store no longer holds the entry, discarding result"
                );
            }
            Settle::Rejected => {
                ResourceMetrics::incr(&self.metrics.fetches_cancelled);
                tracing::debug!(key = ?self.key, epoch = self.epoch, "Fetch cancelled before commit");
            }
            Settle::Superseded => {
                ResourceMetrics::incr(&self.metrics.results_discarded);
                tracing::debug!(
                    key = ?self.key,
                    epoch = self.epoch,
                    current_epoch = self.entry.epoch(),
                    "Entry was reset, discarding result"
                );
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FnFetcher;
    use std::sync::atomic::AtomicUsize;
    use swr_storage::AmnesiaStore;
    use tokio::sync::Semaphore;

    type Engine = FetchEngine<&'static str, String, String>;

    struct Rig {
        store: Arc<AmnesiaStore<&'static str, String, String>>,
        entry: Arc<CacheEntry<String, String>>,
        episode: Scope,
        gate: Arc<Semaphore>,
        calls: Arc<AtomicUsize>,
        metrics: Arc<ResourceMetrics>,
    }

    impl Rig {
        fn new() -> Self {
            let store = AmnesiaStore::shared();
            let entry = Arc::new(CacheEntry::new());
            store.set("k", Some(Arc::clone(&entry)));
            Self {
                store,
                entry,
                episode: Scope::root("ownership"),
                gate: Arc::new(Semaphore::new(0)),
                calls: Arc::new(AtomicUsize::new(0)),
                metrics: Arc::new(ResourceMetrics::new()),
            }
        }

        fn engine(&self) -> Engine {
            let gate = Arc::clone(&self.gate);
            let calls = Arc::clone(&self.calls);
            let fetcher = FnFetcher::new(move |_signal| {
                let gate = Arc::clone(&gate);
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    match gate.acquire().await {
                        Ok(permit) => {
                            permit.forget();
                            Ok::<String, String>(format!("v{n}"))
                        }
                        Err(e) => Err(e.to_string()),
                    }
                }
            });
            FetchEngine::new(
                "k",
                Arc::clone(&self.entry),
                self.store.clone(),
                self.episode.clone(),
                Arc::new(fetcher),
                Arc::clone(&self.metrics),
            )
        }
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_dispatch_sets_pending_synchronously() {
        let rig = Rig::new();
        let mut engine = rig.engine();

        engine.evaluate();
        assert!(rig.entry.snapshot().pending);
        assert!(engine.is_running());

        rig.gate.add_permits(1);
        settle().await;

        let state = rig.entry.snapshot();
        assert_eq!(state.data.as_deref(), Some("v1"));
        assert!(state.fresh);
        assert!(!state.pending);
        assert_eq!(rig.metrics.snapshot().fetches_succeeded, 1);
    }

    #[tokio::test]
    async fn test_redundant_evaluation_is_noop() {
        let rig = Rig::new();
        let mut engine = rig.engine();

        engine.evaluate();
        engine.evaluate();
        settle().await;
        engine.evaluate();

        assert_eq!(rig.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rig.metrics.snapshot().fetches_started, 1);
    }

    #[tokio::test]
    async fn test_reset_supersedes_running_task() {
        let rig = Rig::new();
        let mut engine = rig.engine();
        engine.evaluate();
        settle().await;

        rig.entry.reset_in_place();
        engine.evaluate();
        settle().await;
        assert_eq!(rig.calls.load(Ordering::SeqCst), 2);
        assert!(rig.entry.snapshot().pending);

        rig.gate.add_permits(1);
        settle().await;

        assert_eq!(rig.entry.snapshot().data.as_deref(), Some("v2"));
        let metrics = rig.metrics.snapshot();
        assert_eq!(metrics.fetches_cancelled, 1);
        assert_eq!(metrics.fetches_succeeded, 1);
    }

    #[tokio::test]
    async fn test_result_for_replaced_entry_is_discarded() {
        let rig = Rig::new();
        let mut engine = rig.engine();
        engine.evaluate();
        settle().await;

        let replacement = Arc::new(CacheEntry::new());
        rig.store.set("k", Some(Arc::clone(&replacement)));
        rig.gate.add_permits(1);
        settle().await;

        assert_eq!(rig.entry.snapshot().data, None);
        assert!(!rig.entry.snapshot().pending);
        assert_eq!(replacement.snapshot(), swr_core::EntryState::initial());
        assert_eq!(rig.metrics.snapshot().results_discarded, 1);
    }

    #[tokio::test]
    async fn test_episode_stop_aborts_and_releases_pending() {
        let rig = Rig::new();
        let mut engine = rig.engine();
        engine.evaluate();
        settle().await;

        rig.episode.stop();
        assert!(!rig.entry.snapshot().pending);

        rig.gate.add_permits(1);
        settle().await;

        let state = rig.entry.snapshot();
        assert_eq!(state.data, None);
        assert!(!state.fresh);
        assert_eq!(rig.metrics.snapshot().fetches_cancelled, 1);

        engine.evaluate();
        assert_eq!(rig.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_data() {
        let rig = Rig::new();
        rig.entry.update(|s| {
            s.settle_ok("old".to_string());
            s.fresh = false;
            true
        });
        let fetcher = FnFetcher::new(|_signal| async { Err::<String, String>("boom".to_string()) });
        let mut engine = FetchEngine::new(
            "k",
            Arc::clone(&rig.entry),
            rig.store.clone(),
            rig.episode.clone(),
            Arc::new(fetcher),
            Arc::clone(&rig.metrics),
        );

        engine.evaluate();
        settle().await;

        let state = rig.entry.snapshot();
        assert_eq!(state.data.as_deref(), Some("old"));
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert!(state.fresh);
        assert!(!state.pending);
        assert_eq!(rig.metrics.snapshot().fetches_failed, 1);
    }

    #[tokio::test]
    async fn test_committed_task_is_completed_not_aborted() {
        let rig = Rig::new();
        let hooks_fired = Arc::new(AtomicUsize::new(0));
        let kept = Arc::new(std::sync::Mutex::new(None::<AbortSignal>));
        let fetcher = {
            let hooks_fired = Arc::clone(&hooks_fired);
            let kept = Arc::clone(&kept);
            FnFetcher::new(move |signal: AbortSignal| {
                let fired = Arc::clone(&hooks_fired);
                signal.on_abort(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                });
                *kept.lock().unwrap() = Some(signal);
                async { Ok::<String, String>("v1".to_string()) }
            })
        };
        let mut engine = FetchEngine::new(
            "k",
            Arc::clone(&rig.entry),
            rig.store.clone(),
            rig.episode.clone(),
            Arc::new(fetcher),
            Arc::clone(&rig.metrics),
        );

        engine.evaluate();
        settle().await;
        assert_eq!(rig.entry.snapshot().data.as_deref(), Some("v1"));
        assert!(!engine.is_running());

        // Later evaluations and the episode ending leave the finished task alone.
        engine.evaluate();
        rig.episode.stop();

        let signal = kept.lock().unwrap().clone().unwrap();
        assert!(!signal.is_aborted());
        assert_eq!(hooks_fired.load(Ordering::SeqCst), 0);
        assert_eq!(rig.metrics.snapshot().fetches_cancelled, 0);
    }
}
