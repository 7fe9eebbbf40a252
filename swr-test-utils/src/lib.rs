//! SWR Test Utilities
//!
//! Shared test infrastructure for the SWR workspace:
//! - Controlled fetchers whose outcome the test decides
//! - Scheduler helpers for letting background tasks run
//! - Proptest generators for entry states and configurations
//! - Fixtures and custom assertions

pub use swr_core::{
    AbortSignal, BootstrapMode, ConfigError, EntryState, RetryConfig, Scope, ScopeError, SwrConfig,
    SwrError, SwrResult,
};
pub use swr_resource::{
    FetchConfig, Fetcher, Plugin, PluginContext, Resource, ResourceHandle, ResourceMetrics,
    ResourceOptions,
};
pub use swr_storage::{AmnesiaStore, CacheEntry, Store};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Store type used throughout the tests.
pub type TestStore = AmnesiaStore<String, String, String>;

/// Resource type used throughout the tests.
pub type TestResource = Resource<String, String, String>;

// ============================================================================
// CONTROLLED FETCHER
// ============================================================================

type Outcome<T, E> = Result<T, E>;

struct ControlledInner<T, E> {
    calls: AtomicUsize,
    aborts: AtomicUsize,
    waiting: Mutex<VecDeque<oneshot::Sender<Outcome<T, E>>>>,
}

/// Fetcher that parks every call until the test resolves or rejects it.
///
/// Calls are completed oldest first. Calls whose task was aborted are
/// skipped, so `resolve` always reaches a fetch that can still commit.
pub struct ControlledFetcher<T, E> {
    inner: Arc<ControlledInner<T, E>>,
}

impl<T, E> Clone for ControlledFetcher<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for ControlledFetcher<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> ControlledFetcher<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlledInner {
                calls: AtomicUsize::new(0),
                aborts: AtomicUsize::new(0),
                waiting: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// This fetcher as a trait object.
    pub fn fetcher(&self) -> Arc<dyn Fetcher<T, E>> {
        Arc::new(self.clone())
    }

    /// A configuration pairing `key` with this fetcher.
    pub fn config<K>(&self, key: K) -> FetchConfig<K, T, E> {
        FetchConfig::new(key, self.fetcher())
    }

    /// Number of times `fetch` was invoked.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Number of calls whose abort signal fired.
    pub fn aborts(&self) -> usize {
        self.inner.aborts.load(Ordering::SeqCst)
    }

    /// Number of calls still waiting for an outcome.
    pub fn outstanding(&self) -> usize {
        self.waiting().iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Complete the oldest live call with `value`.
    pub fn resolve(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Fail the oldest live call with `error`.
    pub fn reject(&self, error: E) -> bool {
        self.complete(Err(error))
    }

    fn complete(&self, outcome: Outcome<T, E>) -> bool {
        let mut waiting = self.waiting();
        while let Some(tx) = waiting.pop_front() {
            if tx.is_closed() {
                continue;
            }
            return tx.send(outcome).is_ok();
        }
        false
    }

    fn waiting(&self) -> MutexGuard<'_, VecDeque<oneshot::Sender<Outcome<T, E>>>> {
        self.inner
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<T, E> Fetcher<T, E> for ControlledFetcher<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    async fn fetch(&self, signal: AbortSignal) -> Result<T, E> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiting().push_back(tx);

        let inner = Arc::clone(&self.inner);
        signal.on_abort(move || {
            inner.aborts.fetch_add(1, Ordering::SeqCst);
        });

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => std::future::pending().await,
        }
    }
}

// ============================================================================
// RECORDING PLUGIN
// ============================================================================

/// Plugin that records every setup call.
#[derive(Debug, Default)]
pub struct RecordingPlugin {
    setups: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl RecordingPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    /// Debug rendering of the key of every setup, in order.
    pub fn keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<K, T, E> Plugin<K, T, E> for RecordingPlugin
where
    K: Debug,
{
    fn name(&self) -> &str {
        "recording"
    }

    fn setup(&self, ctx: PluginContext<K, T, E>) {
        self.setups.fetch_add(1, Ordering::SeqCst);
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{:?}", ctx.key));
    }
}

// ============================================================================
// SCHEDULING HELPERS
// ============================================================================

/// Let spawned tasks run until they block.
///
/// Intended for the current-thread runtime used by `#[tokio::test]`.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Yield until `cond` holds. Returns false if it never does.
pub async fn eventually<F>(mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..1_000 {
        if cond() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    cond()
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for SWR types.

    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    /// Generate a short cache key.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z]{1,8}"
    }

    /// Generate a fetched value.
    pub fn arb_value() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,12}"
    }

    /// Generate an arbitrary entry state.
    pub fn arb_entry_state() -> impl Strategy<Value = EntryState<String, String>> {
        (
            proptest::option::of(arb_value()),
            proptest::option::of(arb_value()),
            any::<bool>(),
            any::<bool>(),
            0u32..4,
        )
            .prop_map(|(data, error, pending, fresh, owners)| EntryState {
                data,
                error,
                pending,
                fresh,
                owners,
            })
    }

    /// A command or fetch outcome applied to an entry.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum EntryOp {
        MarkStale,
        Reset,
        Succeed(String),
        Fail(String),
    }

    /// Generate an entry operation.
    pub fn arb_entry_op() -> impl Strategy<Value = EntryOp> {
        prop_oneof![
            Just(EntryOp::MarkStale),
            Just(EntryOp::Reset),
            arb_value().prop_map(EntryOp::Succeed),
            arb_value().prop_map(EntryOp::Fail),
        ]
    }

    /// Generate a valid retry configuration.
    pub fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (1u64..60_000, proptest::option::of(1u32..20)).prop_map(|(interval_ms, max_attempts)| {
            RetryConfig {
                interval_ms,
                max_attempts,
            }
        })
    }

    /// Generate a valid configuration.
    pub fn arb_swr_config() -> impl Strategy<Value = SwrConfig> {
        (
            prop_oneof![Just(BootstrapMode::Deferred), Just(BootstrapMode::Immediate)],
            proptest::option::of(arb_retry_config()),
        )
            .prop_map(|(bootstrap, retry)| SwrConfig { bootstrap, retry })
    }

    /// Generate a retry interval.
    pub fn arb_retry_interval() -> impl Strategy<Value = Duration> {
        (1u64..10_000).prop_map(Duration::from_millis)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use std::time::Duration;

    /// Fresh empty store.
    pub fn store() -> Arc<TestStore> {
        AmnesiaStore::shared()
    }

    /// Entry holding `value`, fresh and idle.
    pub fn fresh_entry(value: &str) -> Arc<CacheEntry<String, String>> {
        let entry = CacheEntry::new();
        entry.update(|s| {
            s.settle_ok(value.to_string());
            true
        });
        Arc::new(entry)
    }

    /// Entry holding `value`, due for revalidation.
    pub fn stale_entry(value: &str) -> Arc<CacheEntry<String, String>> {
        let entry = fresh_entry(value);
        entry.update(|s| s.mark_stale());
        entry
    }

    /// Options that initialise absent entries without deferral.
    pub fn immediate_options() -> ResourceOptions<String, String, String> {
        ResourceOptions::default().with_bootstrap(BootstrapMode::Immediate)
    }

    /// Retry every 100ms, at most `max_attempts` times.
    pub fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig::every(Duration::from_millis(100)).with_max_attempts(max_attempts)
    }

    /// Bind a consumer of `key` on `store`, driven by `fetcher`.
    pub fn bind(
        store: &Arc<TestStore>,
        key: &str,
        fetcher: &ControlledFetcher<String, String>,
    ) -> TestResource {
        bind_with(store, key, fetcher, ResourceOptions::default())
    }

    /// Like [`bind`], with explicit options.
    pub fn bind_with(
        store: &Arc<TestStore>,
        key: &str,
        fetcher: &ControlledFetcher<String, String>,
        options: ResourceOptions<String, String, String>,
    ) -> TestResource {
        match Resource::bind_with(Arc::clone(store), Some(fetcher.config(key.to_string())), options) {
            Ok(resource) => resource,
            Err(e) => panic!("binding {key} failed: {e}"),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for SWR-specific validation.

    use super::*;

    /// Assert every observable field of an entry state except `owners`.
    #[track_caller]
    pub fn assert_entry(
        state: &EntryState<String, String>,
        data: Option<&str>,
        error: Option<&str>,
        pending: bool,
        fresh: bool,
    ) {
        assert_eq!(state.data.as_deref(), data, "data mismatch in {state:?}");
        assert_eq!(state.error.as_deref(), error, "error mismatch in {state:?}");
        assert_eq!(state.pending, pending, "pending mismatch in {state:?}");
        assert_eq!(state.fresh, fresh, "fresh mismatch in {state:?}");
    }

    /// Assert that the store holds an entry for `key` and return its state.
    #[track_caller]
    pub fn assert_stored(store: &TestStore, key: &str) -> EntryState<String, String> {
        match store.get(&key.to_string()) {
            Some(entry) => entry.snapshot(),
            None => panic!("Expected an entry for {key:?}, store has {:?}", store.keys()),
        }
    }

    /// Assert that a SwrResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: Debug>(result: &SwrResult<T>) {
        match result {
            Err(SwrError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a SwrResult is a Scope error.
    #[track_caller]
    pub fn assert_scope_error<T: Debug>(result: &SwrResult<T>) {
        match result {
            Err(SwrError::Scope(_)) => {}
            other => panic!("Expected Scope error, got: {:?}", other),
        }
    }
}
