//! Provider entries: lazily-invoked factories with cached results
//!
//! A [`ProviderEntry`] stores a factory (synchronous or cancellation-aware)
//! and the result of its last successful run. Retrieval either returns the
//! cached value or races a fresh factory run against the caller's
//! [`CancelToken`](crate::CancelToken).

use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::SystemTime;

use crate::entry::{AccessMeta, ErasedValue, TagMap};
use crate::token::CancelToken;

/// Type-erased factory closure.
pub(crate) enum ProviderFn {
    Sync(Box<dyn Fn() -> anyhow::Result<ErasedValue> + Send + Sync>),
    Cancellable(Box<dyn Fn(&CancelToken) -> anyhow::Result<ErasedValue> + Send + Sync>),
}

/// Mutable state guarded by the entry lock.
pub(crate) struct ProviderState {
    pub(crate) cache: Option<ErasedValue>,
    pub(crate) access: AccessMeta,
}

/// Result slot shared between a retrieval and its factory thread. `None`
/// after the caller adopts the result; still `Some` when the caller was
/// cancelled and walked away.
pub(crate) type ResultSlot = Arc<Mutex<Option<anyhow::Result<ErasedValue>>>>;

/// A lazily-invoked factory plus its cached result and access metadata.
pub struct ProviderEntry {
    factory: Arc<ProviderFn>,
    no_cache: bool,
    pub(crate) state: Mutex<ProviderState>,
    created_at: SystemTime,
    tags: TagMap,
}

impl ProviderEntry {
    pub(crate) fn new(factory: ProviderFn, no_cache: bool, tags: TagMap) -> Self {
        Self {
            factory: Arc::new(factory),
            no_cache,
            state: Mutex::new(ProviderState {
                cache: None,
                access: AccessMeta::new(),
            }),
            created_at: SystemTime::now(),
            tags,
        }
    }

    /// True when results are never cached.
    pub fn no_cache(&self) -> bool {
        self.no_cache
    }

    /// True when the factory takes a cancellation token.
    pub fn is_cancellable(&self) -> bool {
        matches!(*self.factory, ProviderFn::Cancellable(_))
    }

    /// True once a computed value is sitting in the cache.
    pub fn has_cached(&self) -> bool {
        self.state.lock().cache.is_some()
    }

    /// True once the factory has run successfully at least once.
    pub fn is_accessed(&self) -> bool {
        self.state.lock().access.is_accessed()
    }

    /// Timestamp of the first successful run, if any.
    pub fn accessed_at(&self) -> Option<SystemTime> {
        self.state.lock().access.accessed_at()
    }

    /// Registration timestamp.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Caller tags supplied at registration.
    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    /// Run the factory on its own thread, publishing into the returned slot
    /// and waking the token's waiters.
    ///
    /// The caller holds the entry lock while racing the slot against its
    /// token. The thread is never aborted: after publishing it re-acquires
    /// the entry lock (i.e. after the caller is done with it) and, if the
    /// result was never adopted, caches it so a cancelled retrieval still
    /// warms the cache. On the adopted path the caller has already taken the
    /// slot and the thread leaves the state untouched, so a later `reload`
    /// cannot be clobbered by a stale result.
    pub(crate) fn launch(self: &Arc<Self>, token: &CancelToken) -> ResultSlot {
        let slot: ResultSlot = Arc::new(Mutex::new(None));
        let entry = Arc::clone(self);
        let token = token.clone();
        let out = Arc::clone(&slot);

        std::thread::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| match &*entry.factory {
                ProviderFn::Sync(factory) => factory(),
                ProviderFn::Cancellable(factory) => factory(&token),
            }))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("provider factory panicked")));

            *out.lock() = Some(result);
            token.notify_waiters();

            let mut state = entry.state.lock();
            if let Some(Ok(value)) = out.lock().take() {
                if !entry.no_cache {
                    state.cache = Some(value);
                }
            }
        });

        slot
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("no_cache", &self.no_cache)
            .field("cancellable", &self.is_cancellable())
            .field("has_cached", &self.has_cached())
            .field("is_accessed", &self.is_accessed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sync_entry(no_cache: bool, factory: impl Fn() -> anyhow::Result<u32> + Send + Sync + 'static) -> Arc<ProviderEntry> {
        Arc::new(ProviderEntry::new(
            ProviderFn::Sync(Box::new(move || {
                factory().map(|v| Arc::new(v) as ErasedValue)
            })),
            no_cache,
            TagMap::new(),
        ))
    }

    #[test]
    fn test_launch_publishes_result() {
        let entry = sync_entry(false, || Ok(41));
        let token = CancelToken::never();

        // Hold the entry lock across the race, as retrieval does.
        let state = entry.state.lock();
        let slot = entry.launch(&token);
        assert!(token.block_until(|| slot.lock().is_some()));

        let value = slot.lock().take().unwrap().unwrap();
        drop(state);
        assert_eq!(*value.downcast::<u32>().unwrap(), 41);
    }

    #[test]
    fn test_abandoned_result_warms_cache() {
        let entry = sync_entry(false, || Ok(5));
        let token = CancelToken::never();

        // Nobody adopts the slot; the factory thread caches on its own.
        let _slot = entry.launch(&token);
        std::thread::sleep(Duration::from_millis(100));
        assert!(entry.has_cached());
    }

    #[test]
    fn test_abandoned_result_not_cached_with_no_cache() {
        let entry = sync_entry(true, || Ok(5));
        let token = CancelToken::never();

        let _slot = entry.launch(&token);
        std::thread::sleep(Duration::from_millis(100));
        assert!(!entry.has_cached());
    }

    #[test]
    fn test_factory_panic_surfaces_as_error() {
        let entry = sync_entry(false, || panic!("boom"));
        let token = CancelToken::never();

        let state = entry.state.lock();
        let slot = entry.launch(&token);
        assert!(token.block_until(|| slot.lock().is_some()));
        let result = slot.lock().take().unwrap();
        drop(state);
        assert!(result.is_err());
    }
}
