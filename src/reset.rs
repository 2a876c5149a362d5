//! Global teardown: bounded-concurrency reset of every registered entry
//!
//! `reset` snapshots every `(type, key)` pair currently present, then tears
//! the entries down on a worker pool capped at the registry's
//! `reset_max_concurrent` tunable. Each entry is unlinked from its partition
//! before its release hook runs, so concurrent readers observe "not found"
//! rather than a half-torn-down entry. Per-entry failures are collected and
//! returned; siblings always run to completion.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::entry::ValueEntry;
use crate::error::RegistryError;
use crate::provider::ProviderEntry;
use crate::registry::{Partition, Registry, ResetOptions, close_value_entry};

#[cfg(feature = "logging")]
use tracing::debug;

/// Teardown behavior shared by both entry kinds.
pub(crate) trait Teardown: Sized {
    /// Run the release protocol for an entry already unlinked from `partition`.
    fn close(partition: &Partition<Self>, key: &str, entry: &Arc<Self>, safe_delete: bool);
}

impl Teardown for ValueEntry {
    fn close(partition: &Partition<Self>, key: &str, entry: &Arc<Self>, safe_delete: bool) {
        close_value_entry(partition, key, entry, safe_delete);
    }
}

impl Teardown for ProviderEntry {
    fn close(_partition: &Partition<Self>, _key: &str, entry: &Arc<Self>, _safe_delete: bool) {
        // Providers have no release hook; lock briefly so an in-flight
        // retrieval finishes before the entry is dropped.
        drop(entry.state.lock());
    }
}

enum Job {
    Value(Arc<Partition<ValueEntry>>, String),
    Provider(Arc<Partition<ProviderEntry>>, String),
}

/// Unlink one entry and run its release protocol. The key is removed before
/// the entry is locked; a pair snapshotted twice or deleted concurrently
/// surfaces as a tagged "not found" error.
fn teardown_entry<E: Teardown>(
    partition: &Partition<E>,
    key: &str,
    default_key: &str,
    skip_on_close: bool,
    safe_delete: bool,
) -> Option<RegistryError> {
    let Some(entry) = partition.entries.remove(key) else {
        return Some(RegistryError::Teardown {
            type_name: partition.type_name.to_owned(),
            key: key.to_owned(),
            source: Box::new(RegistryError::NotFound {
                type_name: partition.type_name,
                key: key.to_owned(),
            }),
        });
    };

    // The default alias shares its entry with the real key; skip the hook
    // there so it cannot fire twice for one value.
    if !skip_on_close && key != default_key {
        E::close(partition, key, &entry, safe_delete);
    }
    None
}

impl Registry {
    /// Tear down every registered entry.
    ///
    /// Release hooks run unless `skip_on_close` is set; under safe-delete
    /// mode each hook waits for its entry's reference count to drain to
    /// zero. Returns the collected per-entry errors (empty on a clean
    /// reset).
    pub fn reset(&self, options: ResetOptions) -> Vec<RegistryError> {
        let safe_delete = self.safe_delete();
        let skip_on_close = options.skip_on_close;
        let default_value_key = self.default_value_key();
        let default_provider_key = self.default_provider_key();

        let mut jobs = Vec::new();
        for partition in self.value_partitions() {
            for key in partition.entries.keys() {
                jobs.push(Job::Value(Arc::clone(&partition), key));
            }
        }
        for partition in self.provider_partitions() {
            for key in partition.entries.keys() {
                jobs.push(Job::Provider(Arc::clone(&partition), key));
            }
        }

        if jobs.is_empty() {
            return Vec::new();
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "keyed_registry",
            entries = jobs.len(),
            max_concurrent = self.reset_max_concurrent(),
            skip_on_close,
            "resetting registry"
        );

        let workers = self.reset_max_concurrent().min(jobs.len());
        let errors = Mutex::new(Vec::new());
        let cursor = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(job) = jobs.get(index) else { break };
                        let error = match job {
                            Job::Value(partition, key) => teardown_entry(
                                partition,
                                key,
                                &default_value_key,
                                skip_on_close,
                                safe_delete,
                            ),
                            Job::Provider(partition, key) => teardown_entry(
                                partition,
                                key,
                                &default_provider_key,
                                skip_on_close,
                                safe_delete,
                            ),
                        };
                        if let Some(error) = error {
                            errors.lock().push(error);
                        }
                    }
                });
            }
        });

        errors.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AddOptions, ProviderGetOptions, ProviderOptions};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Widget(u32);
    struct Gadget;

    #[test]
    fn test_reset_empties_registry() {
        let registry = Registry::new();
        registry.add("a", Widget(1), AddOptions::new()).unwrap();
        registry.add("b", Widget(2), AddOptions::new()).unwrap();
        registry
            .add_provider("p", || Ok(Gadget), ProviderOptions::new())
            .unwrap();

        let errors = registry.reset(ResetOptions::new());
        assert!(errors.is_empty());
        assert!(!registry.exist_by_key::<Widget>("a"));
        assert!(!registry.exist_by_key::<Widget>("b"));
        assert!(!registry.provider_exist_by_key::<Gadget>("p"));
    }

    #[test]
    fn test_reset_runs_close_hooks() {
        let registry = Registry::new();
        let closed = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&closed);
        registry
            .add(
                "a",
                Widget(1),
                AddOptions::new().on_close(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let errors = registry.reset(ResetOptions::new());
        assert!(errors.is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_skip_on_close() {
        let registry = Registry::new();
        let closed = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&closed);
        registry
            .add(
                "a",
                Widget(1),
                AddOptions::new().on_close(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let errors = registry.reset(ResetOptions::new().skip_on_close());
        assert!(errors.is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert!(!registry.exist_by_key::<Widget>("a"));
    }

    #[test]
    fn test_reset_default_alias_hook_fires_once() {
        let registry = Registry::new();
        let closed = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&closed);
        registry
            .add(
                "main",
                Widget(1),
                AddOptions::new()
                    .set_default()
                    .on_close(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();

        // Reachable under both "main" and the default alias; the hook must
        // still fire exactly once.
        let errors = registry.reset(ResetOptions::new());
        assert!(errors.is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_waits_for_held_reference() {
        let registry = Arc::new(Registry::new());
        registry.set_safe_delete(true);

        let closed = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&closed);
        registry
            .add(
                "held",
                Widget(1),
                AddOptions::new().on_close(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let _value = registry.get_by_key::<Widget>("held").unwrap();

        let resetter = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.reset(ResetOptions::new()))
        };

        // The close hook must not fire while the reference is held.
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        // Deduction reaches the draining entry even though reset has
        // already unlinked it.
        registry.deduct_ref_count_by_key::<Widget>("held").unwrap();

        let errors = resetter.join().unwrap();
        assert!(errors.is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_many_entries_bounded() {
        let registry = Registry::new();
        registry.set_reset_max_concurrent(4);
        for i in 0..64 {
            registry
                .add(format!("k{i}"), Widget(i), AddOptions::new())
                .unwrap();
        }

        let errors = registry.reset(ResetOptions::new());
        assert!(errors.is_empty());
        assert!(registry.list_keys::<Widget>().is_empty());
    }

    #[test]
    fn test_reset_provider_cache_discarded() {
        let registry = Registry::new();
        registry
            .add_provider("p", || Ok(Widget(9)), ProviderOptions::new())
            .unwrap();
        let _ = registry
            .get_provider_by_key::<Widget>("p", ProviderGetOptions::new())
            .unwrap();

        let errors = registry.reset(ResetOptions::new());
        assert!(errors.is_empty());
        assert!(
            registry
                .get_provider_by_key::<Widget>("p", ProviderGetOptions::new())
                .is_err()
        );
    }
}
