//! Value entries: stored objects plus lifecycle metadata
//!
//! A [`ValueEntry`] holds one eagerly-supplied object together with access
//! bookkeeping, caller tags, an optional release hook, and a reference
//! counter used by safe-delete mode to drain readers before teardown.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;

use crate::error::RegistryError;

/// Type-erased stored object.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Caller-supplied metadata attached to an entry at registration.
pub type TagMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Release hook invoked when an entry is torn down.
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// Access bookkeeping shared by value and provider entries.
pub(crate) struct AccessMeta {
    is_accessed: bool,
    accessed_at: Option<SystemTime>,
}

impl AccessMeta {
    pub(crate) fn new() -> Self {
        Self {
            is_accessed: false,
            accessed_at: None,
        }
    }

    /// Transition to accessed on first call; later calls are no-ops.
    /// Returns true when this call was the first access.
    pub(crate) fn mark_accessed(&mut self) -> bool {
        if self.is_accessed {
            return false;
        }
        self.is_accessed = true;
        self.accessed_at = Some(SystemTime::now());
        true
    }

    pub(crate) fn is_accessed(&self) -> bool {
        self.is_accessed
    }

    pub(crate) fn accessed_at(&self) -> Option<SystemTime> {
        self.accessed_at
    }
}

/// Reference counter with a wait-for-zero broadcast.
///
/// Waiters re-check the counter in a loop; the decrement that reaches zero
/// takes the lock before notifying so a waiter between its check and its
/// wait cannot miss the wakeup.
struct RefCounter {
    count: AtomicI64,
    lock: Mutex<()>,
    zero: Condvar,
}

impl RefCounter {
    fn new() -> Self {
        Self {
            count: AtomicI64::new(0),
            lock: Mutex::new(()),
            zero: Condvar::new(),
        }
    }

    fn incr(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn decr(&self) {
        let now = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        if now < 0 {
            panic!("{}", RegistryError::RefCounterBelowZero);
        }
        if now == 0 {
            let _guard = self.lock.lock();
            self.zero.notify_all();
        }
    }

    fn wait_until_zero(&self) {
        let mut guard = self.lock.lock();
        while self.count.load(Ordering::SeqCst) > 0 {
            self.zero.wait(&mut guard);
        }
    }

    fn load(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// A stored object plus its lifecycle metadata.
pub struct ValueEntry {
    value: ErasedValue,
    on_close: Mutex<Option<CloseHook>>,
    pub(crate) meta: Mutex<AccessMeta>,
    refs: RefCounter,
    created_at: SystemTime,
    tags: TagMap,
}

impl ValueEntry {
    pub(crate) fn new(value: ErasedValue, on_close: Option<CloseHook>, tags: TagMap) -> Self {
        Self {
            value,
            on_close: Mutex::new(on_close),
            meta: Mutex::new(AccessMeta::new()),
            refs: RefCounter::new(),
            created_at: SystemTime::now(),
            tags,
        }
    }

    /// The stored object, type-erased.
    pub fn value_any(&self) -> ErasedValue {
        Arc::clone(&self.value)
    }

    /// Downcast the stored object to `T`.
    pub(crate) fn downcast<T: Send + Sync + 'static>(&self) -> crate::error::Result<Arc<T>> {
        Arc::clone(&self.value)
            .downcast::<T>()
            .map_err(|_| RegistryError::type_mismatch::<T>())
    }

    /// True once the entry has been retrieved at least once.
    pub fn is_accessed(&self) -> bool {
        self.meta.lock().is_accessed()
    }

    /// Timestamp of the first retrieval, if any.
    pub fn accessed_at(&self) -> Option<SystemTime> {
        self.meta.lock().accessed_at()
    }

    /// Registration timestamp.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Caller tags supplied at registration.
    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    /// Current reference count (0 when safe-delete mode is disabled).
    pub fn ref_count(&self) -> i64 {
        self.refs.load()
    }

    /// True while a release hook is installed and has not fired.
    pub fn has_close_hook(&self) -> bool {
        self.on_close.lock().is_some()
    }

    pub(crate) fn ref_incr(&self, safe_delete: bool) {
        if safe_delete {
            self.refs.incr();
        }
    }

    /// Decrement the reference count. Going below zero is an unpaired
    /// decrement and aborts via panic.
    pub(crate) fn ref_decr(&self, safe_delete: bool) {
        if safe_delete {
            self.refs.decr();
        }
    }

    /// Run the release hook if one is installed and has not fired yet.
    ///
    /// Under safe-delete mode this first drains the reference count to zero;
    /// a reader that never deducts its reference blocks this indefinitely.
    /// The `Option::take` makes the at-most-once guarantee local, on top of
    /// the unlink-before-lock protocol in the registry.
    pub(crate) fn trigger_close(&self, safe_delete: bool) {
        let hook = self.on_close.lock().take();
        if let Some(hook) = hook {
            if safe_delete {
                self.refs.wait_until_zero();
            }
            hook();
        }
    }
}

impl std::fmt::Debug for ValueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueEntry")
            .field("is_accessed", &self.is_accessed())
            .field("ref_count", &self.ref_count())
            .field("has_close_hook", &self.has_close_hook())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn entry_with_hook(fired: Arc<AtomicU32>) -> ValueEntry {
        ValueEntry::new(
            Arc::new(7u32),
            Some(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })),
            TagMap::new(),
        )
    }

    #[test]
    fn test_mark_accessed_idempotent_once() {
        let entry = ValueEntry::new(Arc::new(1u8), None, TagMap::new());
        assert!(!entry.is_accessed());
        assert!(entry.meta.lock().mark_accessed());
        assert!(!entry.meta.lock().mark_accessed());
        assert!(entry.is_accessed());
        assert!(entry.accessed_at().is_some());
    }

    #[test]
    fn test_ref_count_noop_when_disabled() {
        let entry = ValueEntry::new(Arc::new(1u8), None, TagMap::new());
        entry.ref_incr(false);
        entry.ref_decr(false);
        assert_eq!(entry.ref_count(), 0);
    }

    #[test]
    #[should_panic(expected = "ref counter below zero")]
    fn test_unpaired_decrement_panics() {
        let entry = ValueEntry::new(Arc::new(1u8), None, TagMap::new());
        entry.ref_decr(true);
    }

    #[test]
    fn test_close_hook_fires_at_most_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let entry = entry_with_hook(Arc::clone(&fired));

        entry.trigger_close(false);
        entry.trigger_close(false);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!entry.has_close_hook());
    }

    #[test]
    fn test_close_waits_for_ref_zero() {
        let fired = Arc::new(AtomicU32::new(0));
        let entry = Arc::new(entry_with_hook(Arc::clone(&fired)));
        entry.ref_incr(true);

        let closer = {
            let entry = Arc::clone(&entry);
            std::thread::spawn(move || entry.trigger_close(true))
        };

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        entry.ref_decr(true);
        closer.join().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_downcast_mismatch() {
        let entry = ValueEntry::new(Arc::new(7u32), None, TagMap::new());
        assert!(entry.downcast::<u32>().is_ok());
        let err = entry.downcast::<String>().unwrap_err();
        assert!(matches!(err, RegistryError::TypeMismatch { .. }));
    }
}
