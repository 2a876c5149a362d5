//! Lifecycle hook slots and their dispatch contexts
//!
//! The registry carries four process-wide observer slots. Each slot holds at
//! most one observer; installing a new one replaces the old
//! (last-registered-wins). `BeforeDuplicateRegister` is the only observer
//! with veto power: its error aborts the triggering registration. The other
//! three are best-effort notifications and cannot fail.
//!
//! Observers run on the thread that triggered them, after the triggering
//! operation has released the affected entry's lock; the contexts give read
//! access to the entries involved.

use parking_lot::RwLock;
use std::any::TypeId;
use std::sync::Arc;

use crate::entry::{ErasedValue, ValueEntry};
use crate::provider::ProviderEntry;

/// Read access to the entry a hook fired for.
pub enum EntryRef<'a> {
    Value(&'a ValueEntry),
    Provider(&'a ProviderEntry),
}

impl EntryRef<'_> {
    /// True when the hook fired for a provider entry.
    pub fn is_provider(&self) -> bool {
        matches!(self, EntryRef::Provider(_))
    }
}

/// Descriptor passed to `AfterAdd` observers.
pub struct AfterAddContext<'a> {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub key: &'a str,
    pub entry: EntryRef<'a>,
}

/// Descriptor passed to `AfterProviderRun` observers after every fresh
/// (non-cache-hit) factory run.
pub struct AfterProviderRunContext<'a> {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub key: &'a str,
    pub provider: &'a ProviderEntry,
    pub value: &'a ErasedValue,
}

/// Descriptor passed to `AfterFirstAccess` observers on an entry's first
/// successful retrieval or computation.
pub struct AfterFirstAccessContext<'a> {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub key: &'a str,
    pub entry: EntryRef<'a>,
}

/// Descriptor passed to `BeforeDuplicateRegister` observers before an
/// existing entry would be overwritten. `is_default` distinguishes the
/// default-alias check from the specific-key check.
pub struct BeforeDuplicateRegisterContext<'a> {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub key: &'a str,
    pub is_default: bool,
    pub old: EntryRef<'a>,
    pub new: EntryRef<'a>,
}

// Arc rather than Box so dispatch can clone the handle out of the slot and
// release the slot lock before running the observer.
pub type AfterAddHook = Arc<dyn Fn(&AfterAddContext<'_>) + Send + Sync>;
pub type AfterProviderRunHook = Arc<dyn Fn(&AfterProviderRunContext<'_>) + Send + Sync>;
pub type AfterFirstAccessHook = Arc<dyn Fn(&AfterFirstAccessContext<'_>) + Send + Sync>;
pub type BeforeDuplicateRegisterHook =
    Arc<dyn Fn(&BeforeDuplicateRegisterContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// The registry's observer slots.
pub(crate) struct HookSlots {
    pub(crate) after_add: RwLock<Option<AfterAddHook>>,
    pub(crate) after_provider_run: RwLock<Option<AfterProviderRunHook>>,
    pub(crate) after_first_access: RwLock<Option<AfterFirstAccessHook>>,
    pub(crate) before_duplicate_register: RwLock<Option<BeforeDuplicateRegisterHook>>,
}

impl HookSlots {
    pub(crate) fn new() -> Self {
        Self {
            after_add: RwLock::new(None),
            after_provider_run: RwLock::new(None),
            after_first_access: RwLock::new(None),
            before_duplicate_register: RwLock::new(None),
        }
    }

    pub(crate) fn fire_after_add(&self, ctx: &AfterAddContext<'_>) {
        let hook = self.after_add.read().clone();
        if let Some(hook) = hook {
            hook(ctx);
        }
    }

    pub(crate) fn fire_after_provider_run(&self, ctx: &AfterProviderRunContext<'_>) {
        let hook = self.after_provider_run.read().clone();
        if let Some(hook) = hook {
            hook(ctx);
        }
    }

    pub(crate) fn fire_after_first_access(&self, ctx: &AfterFirstAccessContext<'_>) {
        let hook = self.after_first_access.read().clone();
        if let Some(hook) = hook {
            hook(ctx);
        }
    }

    /// Run the veto observer; `Ok(())` when none is installed.
    pub(crate) fn check_duplicate_register(
        &self,
        ctx: &BeforeDuplicateRegisterContext<'_>,
    ) -> anyhow::Result<()> {
        let hook = self.before_duplicate_register.read().clone();
        match hook {
            Some(hook) => hook(ctx),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::TagMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_last_registered_wins() {
        let slots = HookSlots::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&first);
        *slots.after_add.write() = Some(Arc::new(move |_: &AfterAddContext<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = Arc::clone(&second);
        *slots.after_add.write() = Some(Arc::new(move |_: &AfterAddContext<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let entry = ValueEntry::new(Arc::new(1u8), None, TagMap::new());
        assert_eq!(*entry.value_any().downcast_ref::<u8>().unwrap(), 1);
        slots.fire_after_add(&AfterAddContext {
            type_id: TypeId::of::<u8>(),
            type_name: "u8",
            key: "k",
            entry: EntryRef::Value(&entry),
        });

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_veto_installed_is_ok() {
        let slots = HookSlots::new();
        let old = ValueEntry::new(Arc::new(1u8), None, TagMap::new());
        let new = ValueEntry::new(Arc::new(2u8), None, TagMap::new());

        let result = slots.check_duplicate_register(&BeforeDuplicateRegisterContext {
            type_id: TypeId::of::<u8>(),
            type_name: "u8",
            key: "k",
            is_default: false,
            old: EntryRef::Value(&old),
            new: EntryRef::Value(&new),
        });
        assert!(result.is_ok());
    }
}
