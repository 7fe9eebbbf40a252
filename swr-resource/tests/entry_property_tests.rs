//! Property tests for entry commands, the owner counter and stores.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use swr_resource::OwnershipClaim;
use swr_test_utils::generators::{
    arb_entry_op, arb_entry_state, arb_key, arb_retry_interval, arb_swr_config, EntryOp,
};
use swr_test_utils::{CacheEntry, RetryConfig, Store, SwrConfig, TestStore};

proptest! {
    /// Commands and commits keep data/error semantics and never touch `owners`.
    #[test]
    fn prop_entry_commands_preserve_invariants(
        initial in arb_entry_state(),
        ops in prop::collection::vec(arb_entry_op(), 0..32),
    ) {
        let entry = CacheEntry::with_state(initial.clone());
        let mut epoch = entry.epoch();

        for op in ops {
            let before = entry.snapshot();
            match op {
                EntryOp::MarkStale => {
                    entry.update(|s| s.mark_stale());
                    let after = entry.snapshot();
                    prop_assert!(!after.fresh);
                    prop_assert_eq!(&after.data, &before.data);
                    prop_assert_eq!(&after.error, &before.error);
                    prop_assert_eq!(after.pending, before.pending);
                }
                EntryOp::Reset => {
                    epoch = entry.reset_in_place();
                    let after = entry.snapshot();
                    prop_assert_eq!(&after.data, &None);
                    prop_assert_eq!(&after.error, &None);
                    prop_assert!(after.is_due());
                }
                EntryOp::Succeed(value) => {
                    entry.settle(epoch, Ok(value.clone()), || true);
                    let after = entry.snapshot();
                    prop_assert_eq!(after.data, Some(value));
                    prop_assert_eq!(&after.error, &None);
                    prop_assert!(after.fresh && !after.pending);
                }
                EntryOp::Fail(error) => {
                    entry.settle(epoch, Err(error.clone()), || true);
                    let after = entry.snapshot();
                    prop_assert_eq!(&after.data, &before.data);
                    prop_assert_eq!(after.error, Some(error));
                    prop_assert!(after.fresh && !after.pending);
                }
            }
            prop_assert_eq!(entry.snapshot().owners, initial.owners);
        }
    }

    /// A commit dispatched before a reset never lands.
    #[test]
    fn prop_commit_from_old_epoch_is_dropped(
        initial in arb_entry_state(),
        resets in 1usize..4,
        value in "[a-z]{1,8}",
    ) {
        let entry = CacheEntry::<String, String>::with_state(initial);
        let dispatched = entry.epoch();
        for _ in 0..resets {
            entry.reset_in_place();
        }

        entry.settle(dispatched, Ok(value), || true);
        prop_assert_eq!(entry.snapshot().data, None);
    }

    /// Claims on one entry keep `owners` equal to the number of live claims.
    #[test]
    fn prop_claims_never_underflow(releases in prop::collection::vec(0usize..8, 0..24)) {
        let entry = Arc::new(CacheEntry::<String, String>::new());
        let claims: Vec<_> = (0..8).map(|_| OwnershipClaim::acquire(Arc::clone(&entry))).collect();

        for index in releases {
            claims[index].release();
            claims[index].release();
        }
        let live = claims.iter().filter(|c| c.is_committed()).count() as u32;
        prop_assert_eq!(entry.snapshot().owners, live);
    }

    /// The amnesia store behaves like a map from key to entry identity.
    #[test]
    fn prop_store_matches_model(ops in prop::collection::vec((arb_key(), any::<bool>()), 0..48)) {
        let store = TestStore::new();
        let mut model: HashMap<String, Arc<CacheEntry<String, String>>> = HashMap::new();

        for (key, insert) in ops {
            if insert {
                let entry = Arc::new(CacheEntry::new());
                store.set(key.clone(), Some(Arc::clone(&entry)));
                model.insert(key, entry);
            } else {
                store.remove(&key);
                model.remove(&key);
            }
        }

        prop_assert_eq!(store.len(), model.len());
        for (key, entry) in &model {
            let stored = store.get(key);
            prop_assert!(stored.is_some_and(|s| Arc::ptr_eq(&s, entry)));
        }
    }

    /// Whole-millisecond intervals survive the builder unchanged.
    #[test]
    fn prop_retry_interval_is_kept(interval in arb_retry_interval(), max in 1u32..10) {
        let retry = RetryConfig::every(interval).with_max_attempts(max);
        prop_assert_eq!(u128::from(retry.interval_ms), interval.as_millis());
        prop_assert!(retry.validate().is_ok());
    }

    /// Generated configurations are valid and survive a TOML round trip.
    #[test]
    fn prop_generated_configs_validate(config in arb_swr_config()) {
        prop_assert!(config.validate().is_ok());
        let encoded = toml_encode(&config);
        let decoded = SwrConfig::from_toml_str(&encoded).unwrap();
        prop_assert_eq!(decoded, config);
    }
}

fn toml_encode(config: &SwrConfig) -> String {
    let bootstrap = match config.bootstrap {
        swr_test_utils::BootstrapMode::Deferred => "deferred",
        swr_test_utils::BootstrapMode::Immediate => "immediate",
    };
    let mut out = format!("bootstrap = \"{bootstrap}\"\n");
    if let Some(retry) = &config.retry {
        out.push_str(&format!("\n[retry]\ninterval_ms = {}\n", retry.interval_ms));
        if let Some(max) = retry.max_attempts {
            out.push_str(&format!("max_attempts = {max}\n"));
        }
    }
    out
}
