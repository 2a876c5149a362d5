//! # keyed-registry
//!
//! A concurrent, type-indexed object registry. Every registered static type
//! gets its own partition; within a partition, entries are addressed by a
//! string key, with a reserved default alias per type. Objects can be
//! supplied eagerly (values) or computed lazily (providers).
//!
//! ## Features
//!
//! - **Type + key addressing** - one partition per `TypeId`, string keys
//!   within it, a configurable default alias per type
//! - **Two registration modes** - eager values and lazy providers, with
//!   per-provider caching, `reload`, and `no_cache`
//! - **Cancellation** - provider computation races the caller's
//!   [`CancelToken`]; the losing factory keeps running and may still warm
//!   the cache
//! - **Safe teardown** - optional reference counting with wait-for-zero
//!   before release hooks fire
//! - **Lifecycle hooks** - `AfterAdd`, `AfterProviderRun`,
//!   `AfterFirstAccess`, and a `BeforeDuplicateRegister` veto
//! - **Bounded reset** - tear down everything on a capped worker pool
//! - **Observable** - optional `tracing` integration (default `logging`
//!   feature)
//!
//! ## Quick start
//!
//! ```rust
//! use keyed_registry::{AddOptions, Registry};
//!
//! struct Database {
//!     url: String,
//! }
//!
//! let registry = Registry::new();
//!
//! // Register under a key; `set_default` also populates the type's alias.
//! registry
//!     .add("primary", Database { url: "postgres://one".into() }, AddOptions::new())
//!     .unwrap();
//! registry
//!     .add(
//!         "replica",
//!         Database { url: "postgres://two".into() },
//!         AddOptions::new().set_default(),
//!     )
//!     .unwrap();
//!
//! // Keyed and default-alias retrieval return `Arc<T>`.
//! let primary = registry.get_by_key::<Database>("primary").unwrap();
//! let default = registry.get::<Database>().unwrap();
//! assert_eq!(primary.url, "postgres://one");
//! assert_eq!(default.url, "postgres://two");
//! ```
//!
//! ## Lazy providers
//!
//! ```rust
//! use keyed_registry::{ProviderGetOptions, ProviderOptions, Registry};
//!
//! struct Pool {
//!     size: usize,
//! }
//!
//! let registry = Registry::new();
//! registry
//!     .add_provider("pool", || Ok(Pool { size: 8 }), ProviderOptions::new())
//!     .unwrap();
//!
//! // The factory runs on first retrieval; later calls hit the cache.
//! let a = registry.get_provider_by_key::<Pool>("pool", ProviderGetOptions::new()).unwrap();
//! let b = registry.get_provider_by_key::<Pool>("pool", ProviderGetOptions::new()).unwrap();
//! assert!(std::sync::Arc::ptr_eq(&a, &b));
//! ```
//!
//! ## Safe delete
//!
//! With safe-delete mode enabled, every successful `get` increments the
//! entry's reference count and must be paired with one `deduct_ref_count`
//! call. Release hooks (delete and reset) wait for the count to drain to
//! zero before firing, so an object is never torn down under a live reader.

mod entry;
mod error;
pub mod global;
mod hooks;
pub mod inject;
#[cfg(any(feature = "logging-pretty", feature = "logging-json"))]
pub mod logging;
pub mod map;
mod provider;
mod registry;
mod reset;
mod token;

pub use entry::{CloseHook, ErasedValue, TagMap, ValueEntry};
pub use error::{RegistryError, Result};
pub use hooks::{
    AfterAddContext, AfterAddHook, AfterFirstAccessContext, AfterFirstAccessHook,
    AfterProviderRunContext, AfterProviderRunHook, BeforeDuplicateRegisterContext,
    BeforeDuplicateRegisterHook, EntryRef,
};
pub use inject::Inject;
pub use map::{CompactingMap, set_default_compaction_threshold};
pub use provider::ProviderEntry;
pub use registry::{
    AddOptions, DeleteOptions, ProviderGetOptions, ProviderOptions, Registry, ResetOptions,
};
pub use token::{CancelSource, CancelToken};

// Re-export tracing macros for convenience when logging is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AddOptions, CancelSource, CancelToken, DeleteOptions, Inject, ProviderGetOptions,
        ProviderOptions, Registry, RegistryError, ResetOptions, Result,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Database {
        url: String,
    }

    #[derive(Debug)]
    struct Pool {
        size: usize,
    }

    #[test]
    fn test_value_registration_and_retrieval() {
        let registry = Registry::new();
        registry
            .add("primary", Database { url: "a".into() }, AddOptions::new())
            .unwrap();

        let db = registry.get_by_key::<Database>("primary").unwrap();
        assert_eq!(db.url, "a");
        assert!(registry.get_by_key::<Pool>("primary").unwrap_err().is_not_found());
    }

    #[test]
    fn test_partitions_are_independent_per_type() {
        let registry = Registry::new();
        registry
            .add("shared-key", Database { url: "db".into() }, AddOptions::new())
            .unwrap();
        registry
            .add("shared-key", Pool { size: 4 }, AddOptions::new())
            .unwrap();

        assert_eq!(registry.get_by_key::<Database>("shared-key").unwrap().url, "db");
        assert_eq!(registry.get_by_key::<Pool>("shared-key").unwrap().size, 4);
    }

    #[test]
    fn test_default_alias_tracks_latest() {
        let registry = Registry::new();
        registry
            .add("one", Database { url: "one".into() }, AddOptions::new().set_default())
            .unwrap();
        registry
            .add("two", Database { url: "two".into() }, AddOptions::new().set_default())
            .unwrap();

        assert_eq!(registry.get::<Database>().unwrap().url, "two");
    }

    #[test]
    fn test_provider_lifecycle_end_to_end() {
        static RUNS: AtomicU32 = AtomicU32::new(0);

        let registry = Registry::new();
        registry
            .add_provider(
                "pool",
                || {
                    RUNS.fetch_add(1, Ordering::SeqCst);
                    Ok(Pool { size: 16 })
                },
                ProviderOptions::new().set_default(),
            )
            .unwrap();

        assert_eq!(RUNS.load(Ordering::SeqCst), 0);

        let by_key = registry
            .get_provider_by_key::<Pool>("pool", ProviderGetOptions::new())
            .unwrap();
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
        assert_eq!(by_key.size, 16);

        // The alias shares the entry, so its cache is already warm.
        let by_default = registry.get_provider::<Pool>(ProviderGetOptions::new()).unwrap();
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&by_key, &by_default));
    }

    #[test]
    fn test_safe_delete_round_trip() {
        let registry = Registry::new();
        registry.set_safe_delete(true);

        let closed = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&closed);
        registry
            .add(
                "held",
                Database { url: "a".into() },
                AddOptions::new().on_close(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let _db = registry.get_by_key::<Database>("held").unwrap();
        registry.deduct_ref_count_by_key::<Database>("held").unwrap();

        registry
            .delete_by_key::<Database>("held", DeleteOptions::new())
            .unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_clears_both_sides() {
        let registry = Registry::new();
        registry
            .add("db", Database { url: "a".into() }, AddOptions::new())
            .unwrap();
        registry
            .add_provider("pool", || Ok(Pool { size: 1 }), ProviderOptions::new())
            .unwrap();

        assert!(registry.reset(ResetOptions::new()).is_empty());
        assert!(!registry.exist_by_key::<Database>("db"));
        assert!(!registry.provider_exist_by_key::<Pool>("pool"));
    }
}
