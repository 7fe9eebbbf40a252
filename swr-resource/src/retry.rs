//! Periodic retry of failed fetches.

use swr_core::{CacheKey, CacheValue, RetryConfig};
use tokio::time::{interval, MissedTickBehavior};

use crate::plugin::{Plugin, PluginContext};

/// Plugin that marks an errored entry stale on a fixed interval.
///
/// Each tick checks the entry: if it holds an error and no fetch is in
/// flight, the entry is marked stale and the engine refetches it. A
/// successful fetch resets the attempt counter. With `max_attempts` set the
/// loop gives up after that many consecutive attempts.
#[derive(Debug, Clone)]
pub struct RetryOnError {
    config: RetryConfig,
}

impl RetryOnError {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl<K, T, E> Plugin<K, T, E> for RetryOnError
where
    K: CacheKey,
    T: CacheValue,
    E: CacheValue,
{
    fn name(&self) -> &str {
        "retry_on_error"
    }

    fn setup(&self, ctx: PluginContext<K, T, E>) {
        let period = self.config.interval();
        let max_attempts = self.config.max_attempts;
        let handle = ctx.handle.clone();
        let key = ctx.key.clone();

        ctx.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            tracing::info!(key = ?key, interval_ms = period.as_millis() as u64, "Retry loop started");

            let mut attempts: u32 = 0;
            loop {
                ticker.tick().await;
                if !handle.is_live() {
                    break;
                }

                let state = handle.state();
                if state.error.is_none() {
                    attempts = 0;
                    continue;
                }
                if state.pending {
                    continue;
                }
                if max_attempts.is_some_and(|max| attempts >= max) {
                    tracing::info!(key = ?key, attempts, "Retry attempts exhausted");
                    break;
                }
                if handle.mark_stale() {
                    attempts += 1;
                    tracing::debug!(key = ?key, attempt = attempts, "Retrying failed fetch");
                }
            }
        });
    }
}
