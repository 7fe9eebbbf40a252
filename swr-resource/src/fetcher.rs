//! Fetch operations and fetch configurations.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use swr_core::AbortSignal;

/// Asynchronous operation that produces the value for one key.
///
/// The engine races the returned future against `signal`; once the signal is
/// aborted the future is dropped and whatever it would have produced is
/// ignored. Implementations may also poll the signal or register abort hooks
/// to stop work early.
#[async_trait]
pub trait Fetcher<T, E>: Send + Sync {
    async fn fetch(&self, signal: AbortSignal) -> Result<T, E>;
}

/// Adapter turning a closure into a [`Fetcher`].
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<T, E, F, Fut> Fetcher<T, E> for FnFetcher<F>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(AbortSignal) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
{
    async fn fetch(&self, signal: AbortSignal) -> Result<T, E> {
        (self.f)(signal).await
    }
}

/// A key paired with the operation that fetches it.
///
/// Bindings compare configurations by key only: swapping the fetcher of an
/// unchanged key never starts a fetch on its own.
pub struct FetchConfig<K, T, E> {
    key: K,
    fetcher: Arc<dyn Fetcher<T, E>>,
}

impl<K, T, E> FetchConfig<K, T, E> {
    pub fn new(key: K, fetcher: Arc<dyn Fetcher<T, E>>) -> Self {
        Self { key, fetcher }
    }

    /// Build a configuration from an async closure.
    ///
    /// ```ignore
    /// let config = FetchConfig::from_fn("user:1", |_signal| async { Ok::<_, String>(42) });
    /// ```
    pub fn from_fn<F, Fut>(key: K, f: F) -> Self
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::new(key, Arc::new(FnFetcher::new(f)))
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn fetcher(&self) -> Arc<dyn Fetcher<T, E>> {
        Arc::clone(&self.fetcher)
    }

    /// True if both configurations resolve to the same key.
    pub fn same_key(&self, other: &Self) -> bool
    where
        K: PartialEq,
    {
        self.key == other.key
    }
}

impl<K: Clone, T, E> Clone for FetchConfig<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

impl<K: fmt::Debug, T, E> fmt::Debug for FetchConfig<K, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_fetcher_forwards_signal() {
        let config = FetchConfig::from_fn("k", |signal: AbortSignal| async move {
            if signal.is_aborted() {
                Err("aborted".to_string())
            } else {
                Ok(7u32)
            }
        });

        assert_eq!(config.fetcher().fetch(AbortSignal::never()).await, Ok(7));
    }

    #[test]
    fn test_same_key_ignores_fetcher() {
        let a = FetchConfig::from_fn("k", |_| async { Ok::<u32, String>(1) });
        let b = FetchConfig::from_fn("k", |_| async { Ok::<u32, String>(2) });
        let c = FetchConfig::from_fn("other", |_| async { Ok::<u32, String>(1) });

        assert!(a.same_key(&b));
        assert!(!a.same_key(&c));
        assert_eq!(a.clone().key(), &"k");
    }
}
