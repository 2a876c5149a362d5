//! The registry: concurrent, type-indexed storage for values and providers
//!
//! Each registered static type gets its own partition, keyed internally by
//! `TypeId`; within a partition, entries are addressed by a string key. The
//! empty string (configurable) is the reserved default alias. Values are
//! supplied eagerly; providers are computed lazily and optionally cached.

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::entry::{CloseHook, ErasedValue, TagMap, ValueEntry};
use crate::error::{RegistryError, Result};
use crate::hooks::{
    AfterAddContext, AfterAddHook, AfterFirstAccessContext, AfterFirstAccessHook,
    AfterProviderRunContext, AfterProviderRunHook, BeforeDuplicateRegisterContext,
    BeforeDuplicateRegisterHook, EntryRef, HookSlots,
};
use crate::map::CompactingMap;
use crate::provider::{ProviderEntry, ProviderFn};
use crate::token::CancelToken;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Per-type storage: the keyed entries plus the type name for diagnostics.
///
/// `draining` tracks entries that have been unlinked but whose release hook
/// is still waiting for the reference count to drain. Readers never consult
/// it; `deduct_ref_count` does, so a held reference can still be released
/// while a delete or reset is blocked on it.
pub(crate) struct Partition<E> {
    pub(crate) type_name: &'static str,
    pub(crate) entries: CompactingMap<String, Arc<E>>,
    pub(crate) draining: Mutex<Vec<(String, Arc<E>)>>,
}

impl<E> Partition<E> {
    fn new<T: 'static>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            entries: CompactingMap::new(),
            draining: Mutex::new(Vec::new()),
        }
    }
}

/// Unlinked-entry close protocol: park the entry in the draining ledger,
/// run the release hook (waiting for ref-zero under safe-delete), then drop
/// it from the ledger.
pub(crate) fn close_value_entry(
    partition: &Partition<ValueEntry>,
    key: &str,
    entry: &Arc<ValueEntry>,
    safe_delete: bool,
) {
    partition
        .draining
        .lock()
        .push((key.to_owned(), Arc::clone(entry)));

    let meta = entry.meta.lock();
    entry.trigger_close(safe_delete);
    drop(meta);

    let mut draining = partition.draining.lock();
    if let Some(pos) = draining
        .iter()
        .position(|(k, e)| k == key && Arc::ptr_eq(e, entry))
    {
        draining.swap_remove(pos);
    }
}

// =============================================================================
// Options
// =============================================================================

/// Options for [`Registry::add`].
#[derive(Default)]
pub struct AddOptions {
    pub(crate) on_close: Option<CloseHook>,
    pub(crate) set_default: bool,
    pub(crate) tags: TagMap,
}

impl AddOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a release hook, invoked exactly once when the entry is torn
    /// down (after the ref counter drains to zero under safe-delete mode).
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Also register the value under the type's default alias.
    pub fn set_default(mut self) -> Self {
        self.set_default = true;
        self
    }

    /// Attach a tag readable through [`ValueEntry::tags`].
    pub fn tag(
        mut self,
        key: impl Into<String>,
        value: impl std::any::Any + Send + Sync,
    ) -> Self {
        self.tags.insert(key.into(), Arc::new(value));
        self
    }
}

/// Options for [`Registry::add_provider`] and
/// [`Registry::add_cancellable_provider`].
#[derive(Default)]
pub struct ProviderOptions {
    pub(crate) set_default: bool,
    pub(crate) no_cache: bool,
    pub(crate) tags: TagMap,
}

impl ProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also register the provider under the type's default alias.
    pub fn set_default(mut self) -> Self {
        self.set_default = true;
        self
    }

    /// Never cache factory results; every retrieval recomputes.
    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    /// Attach a tag readable through [`ProviderEntry::tags`].
    pub fn tag(
        mut self,
        key: impl Into<String>,
        value: impl std::any::Any + Send + Sync,
    ) -> Self {
        self.tags.insert(key.into(), Arc::new(value));
        self
    }
}

/// Options for provider retrieval.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderGetOptions {
    pub reload: bool,
}

impl ProviderGetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute even when a cached value exists.
    pub fn reload(mut self) -> Self {
        self.reload = true;
        self
    }
}

/// Options for [`Registry::delete`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeleteOptions {
    pub skip_on_close: bool,
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unlink the entry without running its release hook.
    pub fn skip_on_close(mut self) -> Self {
        self.skip_on_close = true;
        self
    }
}

/// Options for [`Registry::reset`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ResetOptions {
    pub skip_on_close: bool,
}

impl ResetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tear entries down without running their release hooks.
    pub fn skip_on_close(mut self) -> Self {
        self.skip_on_close = true;
        self
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Concurrent, type-indexed object registry.
///
/// # Examples
///
/// ```rust
/// use keyed_registry::{AddOptions, Registry};
///
/// struct Database {
///     url: String,
/// }
///
/// let registry = Registry::new();
/// registry
///     .add("primary", Database { url: "postgres://localhost".into() }, AddOptions::new())
///     .unwrap();
///
/// let db = registry.get_by_key::<Database>("primary").unwrap();
/// assert_eq!(db.url, "postgres://localhost");
/// ```
pub struct Registry {
    values: DashMap<TypeId, Arc<Partition<ValueEntry>>, RandomState>,
    providers: DashMap<TypeId, Arc<Partition<ProviderEntry>>, RandomState>,
    pub(crate) hooks: HookSlots,
    safe_delete: AtomicBool,
    reset_max_concurrent: AtomicUsize,
    default_value_key: RwLock<String>,
    default_provider_key: RwLock<String>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        #[cfg(feature = "logging")]
        debug!(target: "keyed_registry", "creating registry");

        Self {
            // 8 shards balances creation speed vs concurrency for the
            // handful of types a typical registry holds.
            values: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
            providers: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
            hooks: HookSlots::new(),
            safe_delete: AtomicBool::new(false),
            reset_max_concurrent: AtomicUsize::new(100),
            default_value_key: RwLock::new(String::new()),
            default_provider_key: RwLock::new(String::new()),
        }
    }

    // =========================================================================
    // Configuration
    //
    // Intended to be set once before concurrent use begins; reconfiguration
    // during active use is memory-safe but its timing relative to in-flight
    // operations is unspecified.
    // =========================================================================

    /// Enable or disable safe-delete mode (ref counting + wait-for-zero
    /// before release hooks run).
    pub fn set_safe_delete(&self, enabled: bool) {
        self.safe_delete.store(enabled, Ordering::Relaxed);
    }

    /// Current safe-delete mode.
    pub fn safe_delete(&self) -> bool {
        self.safe_delete.load(Ordering::Relaxed)
    }

    /// Cap the number of concurrent teardown tasks during [`Registry::reset`].
    /// Passing 0 restores the default of 100.
    pub fn set_reset_max_concurrent(&self, cap: usize) {
        let cap = if cap == 0 { 100 } else { cap };
        self.reset_max_concurrent.store(cap, Ordering::Relaxed);
    }

    /// Current reset concurrency cap.
    pub fn reset_max_concurrent(&self) -> usize {
        self.reset_max_concurrent.load(Ordering::Relaxed)
    }

    /// Change the sentinel string used as the default alias for values.
    pub fn set_default_value_key(&self, key: impl Into<String>) {
        *self.default_value_key.write() = key.into();
    }

    /// Current default-alias sentinel for values.
    pub fn default_value_key(&self) -> String {
        self.default_value_key.read().clone()
    }

    /// Change the sentinel string used as the default alias for providers.
    pub fn set_default_provider_key(&self, key: impl Into<String>) {
        *self.default_provider_key.write() = key.into();
    }

    /// Current default-alias sentinel for providers.
    pub fn default_provider_key(&self) -> String {
        self.default_provider_key.read().clone()
    }

    // =========================================================================
    // Hooks (single active observer per slot, last-registered-wins)
    // =========================================================================

    /// Observe successful registrations.
    pub fn on_after_add(&self, hook: impl Fn(&AfterAddContext<'_>) + Send + Sync + 'static) {
        *self.hooks.after_add.write() = Some(Arc::new(hook) as AfterAddHook);
    }

    /// Observe every fresh provider computation.
    pub fn on_after_provider_run(
        &self,
        hook: impl Fn(&AfterProviderRunContext<'_>) + Send + Sync + 'static,
    ) {
        *self.hooks.after_provider_run.write() = Some(Arc::new(hook) as AfterProviderRunHook);
    }

    /// Observe the first access of each entry.
    pub fn on_after_first_access(
        &self,
        hook: impl Fn(&AfterFirstAccessContext<'_>) + Send + Sync + 'static,
    ) {
        *self.hooks.after_first_access.write() = Some(Arc::new(hook) as AfterFirstAccessHook);
    }

    /// Install the duplicate-registration veto. Returning an error from the
    /// observer aborts the triggering registration before any mutation.
    pub fn on_before_duplicate_register(
        &self,
        hook: impl Fn(&BeforeDuplicateRegisterContext<'_>) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
    ) {
        *self.hooks.before_duplicate_register.write() =
            Some(Arc::new(hook) as BeforeDuplicateRegisterHook);
    }

    // =========================================================================
    // Value registration & retrieval
    // =========================================================================

    /// Register a value under `key`.
    ///
    /// The reserved default alias cannot be used as a caller-supplied key;
    /// use [`AddOptions::set_default`] to populate it.
    pub fn add<T: Send + Sync + 'static>(
        &self,
        key: impl Into<String>,
        value: T,
        options: AddOptions,
    ) -> Result<()> {
        let key = key.into();
        if key == *self.default_value_key.read() {
            return Err(RegistryError::InvalidKey);
        }

        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();
        let entry = Arc::new(ValueEntry::new(
            Arc::new(value) as ErasedValue,
            options.on_close,
            options.tags,
        ));
        let partition = self.value_partition::<T>();

        if let Some(old) = partition.entries.get(key.as_str()) {
            self.hooks
                .check_duplicate_register(&BeforeDuplicateRegisterContext {
                    type_id,
                    type_name,
                    key: &key,
                    is_default: false,
                    old: EntryRef::Value(&old),
                    new: EntryRef::Value(&entry),
                })
                .map_err(RegistryError::Vetoed)?;
        }

        // The alias is written before the specific key; a vetoed alias swap
        // only skips the alias, never the specific-key registration.
        if options.set_default {
            let default_key = self.default_value_key.read().clone();
            let mut swap_alias = true;
            if let Some(old) = partition.entries.get(default_key.as_str()) {
                let verdict = self
                    .hooks
                    .check_duplicate_register(&BeforeDuplicateRegisterContext {
                        type_id,
                        type_name,
                        key: &key,
                        is_default: true,
                        old: EntryRef::Value(&old),
                        new: EntryRef::Value(&entry),
                    });
                if let Err(_reject) = verdict {
                    swap_alias = false;
                    #[cfg(feature = "logging")]
                    debug!(
                        target: "keyed_registry",
                        service = type_name,
                        error = %_reject,
                        "default alias swap vetoed; keeping existing default"
                    );
                }
            }
            if swap_alias {
                partition.entries.insert(default_key, Arc::clone(&entry));
            }
        }

        partition.entries.insert(key.clone(), Arc::clone(&entry));

        #[cfg(feature = "logging")]
        debug!(
            target: "keyed_registry",
            service = type_name,
            key = %key,
            set_default = options.set_default,
            "registered value"
        );

        self.hooks.fire_after_add(&AfterAddContext {
            type_id,
            type_name,
            key: &key,
            entry: EntryRef::Value(&entry),
        });

        Ok(())
    }

    /// Retrieve the default-alias value for `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = self.default_value_key.read().clone();
        self.get_by_key::<T>(&key)
    }

    /// Retrieve the value registered under `key`.
    ///
    /// Under safe-delete mode every successful call increments the entry's
    /// reference count; pair it with [`Registry::deduct_ref_count_by_key`].
    pub fn get_by_key<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>> {
        let (partition, entry) = self.lookup_value::<T>(key)?;

        // Access marking and the ref count are settled under the entry lock;
        // the hook fires after release so it can inspect the entry freely.
        let first_access = {
            let mut meta = entry.meta.lock();
            let first_access = meta.mark_accessed();
            entry.ref_incr(self.safe_delete());
            first_access
        };
        if first_access {
            self.hooks.fire_after_first_access(&AfterFirstAccessContext {
                type_id: TypeId::of::<T>(),
                type_name: partition.type_name,
                key,
                entry: EntryRef::Value(&entry),
            });
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "keyed_registry",
            service = partition.type_name,
            key = %key,
            "value retrieved"
        );

        entry.downcast::<T>()
    }

    /// Panicking convenience for [`Registry::get`].
    pub fn must_get<T: Send + Sync + 'static>(&self) -> Arc<T> {
        self.get::<T>().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Panicking convenience for [`Registry::get_by_key`].
    pub fn must_get_by_key<T: Send + Sync + 'static>(&self, key: &str) -> Arc<T> {
        self.get_by_key::<T>(key).unwrap_or_else(|err| panic!("{err}"))
    }

    /// True when a value is registered under the default alias.
    ///
    /// A pure lookup: no access marking, no ref counting.
    pub fn exist<T: 'static>(&self) -> bool {
        let key = self.default_value_key.read().clone();
        self.exist_by_key::<T>(&key)
    }

    /// True when a value is registered under `key`.
    pub fn exist_by_key<T: 'static>(&self, key: &str) -> bool {
        self.value_partition_of(TypeId::of::<T>())
            .is_some_and(|partition| partition.entries.contains_key(key))
    }

    /// Keys registered for `T`, excluding the default alias.
    pub fn list_keys<T: 'static>(&self) -> Vec<String> {
        let default_key = self.default_value_key.read().clone();
        let Some(partition) = self.value_partition_of(TypeId::of::<T>()) else {
            return Vec::new();
        };
        let mut keys = Vec::with_capacity(partition.entries.len());
        partition.entries.for_each(|key, _| {
            if *key != default_key {
                keys.push(key.clone());
            }
            true
        });
        keys
    }

    /// Every value registered for `T`, excluding the default alias.
    ///
    /// Like `exist`, a pure read: no access marking, no ref counting.
    pub fn get_all<T: Send + Sync + 'static>(&self) -> Vec<Arc<T>> {
        let default_key = self.default_value_key.read().clone();
        let Some(partition) = self.value_partition_of(TypeId::of::<T>()) else {
            return Vec::new();
        };
        let mut values = Vec::with_capacity(partition.entries.len());
        partition.entries.for_each(|key, entry| {
            if *key != default_key {
                if let Ok(value) = entry.downcast::<T>() {
                    values.push(value);
                }
            }
            true
        });
        values
    }

    /// Delete the default-alias value for `T`, running its release hook.
    pub fn delete<T: 'static>(&self, options: DeleteOptions) -> Result<()> {
        let key = self.default_value_key.read().clone();
        self.delete_by_key::<T>(&key, options)
    }

    /// Delete the value registered under `key`.
    ///
    /// The entry is unlinked from the registry before its release hook runs,
    /// so a concurrent reader or second delete observes "not found" rather
    /// than a half-torn-down entry. Under safe-delete mode the hook waits
    /// for the reference count to drain to zero first.
    pub fn delete_by_key<T: 'static>(&self, key: &str, options: DeleteOptions) -> Result<()> {
        let partition = self
            .value_partition_of(TypeId::of::<T>())
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;
        let entry = partition
            .entries
            .remove(key)
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;

        #[cfg(feature = "logging")]
        debug!(
            target: "keyed_registry",
            service = partition.type_name,
            key = %key,
            skip_on_close = options.skip_on_close,
            "deleting value"
        );

        if options.skip_on_close {
            // Still take the entry lock so an in-flight retrieval finishes
            // before the entry is dropped.
            drop(entry.meta.lock());
        } else {
            close_value_entry(&partition, key, &entry, self.safe_delete());
        }
        Ok(())
    }

    /// Release one reference on the default-alias value for `T`.
    ///
    /// Contract: exactly one call per successful `get` when safe-delete mode
    /// is enabled. An unpaired call aborts via panic.
    pub fn deduct_ref_count<T: 'static>(&self) -> Result<()> {
        let key = self.default_value_key.read().clone();
        self.deduct_ref_count_by_key::<T>(&key)
    }

    /// Release one reference on the value registered under `key`.
    ///
    /// Also reaches entries that a delete or reset has already unlinked but
    /// is still draining, so a blocked teardown can be released.
    pub fn deduct_ref_count_by_key<T: 'static>(&self, key: &str) -> Result<()> {
        let partition = self
            .value_partition_of(TypeId::of::<T>())
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;
        let entry = partition
            .entries
            .get(key)
            .or_else(|| {
                partition
                    .draining
                    .lock()
                    .iter()
                    .find(|(drain_key, _)| drain_key == key)
                    .map(|(_, entry)| Arc::clone(entry))
            })
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;
        entry.ref_decr(self.safe_delete());
        Ok(())
    }

    // =========================================================================
    // Provider registration & retrieval
    // =========================================================================

    /// Register a synchronous provider factory under `key`.
    pub fn add_provider<T, F>(
        &self,
        key: impl Into<String>,
        factory: F,
        options: ProviderOptions,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let factory = ProviderFn::Sync(Box::new(move || {
            factory().map(|value| Arc::new(value) as ErasedValue)
        }));
        self.add_provider_entry::<T>(key.into(), factory, options)
    }

    /// Register a cancellation-aware provider factory under `key`.
    ///
    /// The factory receives the retrieving caller's [`CancelToken`] and may
    /// poll it to stop early; the registry itself never aborts a running
    /// factory.
    pub fn add_cancellable_provider<T, F>(
        &self,
        key: impl Into<String>,
        factory: F,
        options: ProviderOptions,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&CancelToken) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let factory = ProviderFn::Cancellable(Box::new(move |token| {
            factory(token).map(|value| Arc::new(value) as ErasedValue)
        }));
        self.add_provider_entry::<T>(key.into(), factory, options)
    }

    fn add_provider_entry<T: 'static>(
        &self,
        key: String,
        factory: ProviderFn,
        options: ProviderOptions,
    ) -> Result<()> {
        if key == *self.default_provider_key.read() {
            return Err(RegistryError::InvalidKey);
        }

        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();
        let entry = Arc::new(ProviderEntry::new(factory, options.no_cache, options.tags));
        let partition = self.provider_partition::<T>();

        if let Some(old) = partition.entries.get(key.as_str()) {
            self.hooks
                .check_duplicate_register(&BeforeDuplicateRegisterContext {
                    type_id,
                    type_name,
                    key: &key,
                    is_default: false,
                    old: EntryRef::Provider(&old),
                    new: EntryRef::Provider(&entry),
                })
                .map_err(RegistryError::Vetoed)?;
        }

        if options.set_default {
            let default_key = self.default_provider_key.read().clone();
            let mut swap_alias = true;
            if let Some(old) = partition.entries.get(default_key.as_str()) {
                let verdict = self
                    .hooks
                    .check_duplicate_register(&BeforeDuplicateRegisterContext {
                        type_id,
                        type_name,
                        key: &key,
                        is_default: true,
                        old: EntryRef::Provider(&old),
                        new: EntryRef::Provider(&entry),
                    });
                if let Err(_reject) = verdict {
                    swap_alias = false;
                    #[cfg(feature = "logging")]
                    debug!(
                        target: "keyed_registry",
                        service = type_name,
                        error = %_reject,
                        "default alias swap vetoed; keeping existing default"
                    );
                }
            }
            if swap_alias {
                partition.entries.insert(default_key, Arc::clone(&entry));
            }
        }

        partition.entries.insert(key.clone(), Arc::clone(&entry));

        #[cfg(feature = "logging")]
        debug!(
            target: "keyed_registry",
            service = type_name,
            key = %key,
            no_cache = entry.no_cache(),
            "registered provider"
        );

        self.hooks.fire_after_add(&AfterAddContext {
            type_id,
            type_name,
            key: &key,
            entry: EntryRef::Provider(&entry),
        });

        Ok(())
    }

    /// Retrieve the default-alias provider's value for `T`.
    pub fn get_provider<T: Send + Sync + 'static>(
        &self,
        options: ProviderGetOptions,
    ) -> Result<Arc<T>> {
        self.get_provider_with_token::<T>(&CancelToken::never(), options)
    }

    /// Retrieve the provider value registered under `key`.
    pub fn get_provider_by_key<T: Send + Sync + 'static>(
        &self,
        key: &str,
        options: ProviderGetOptions,
    ) -> Result<Arc<T>> {
        self.get_provider_by_key_with_token::<T>(&CancelToken::never(), key, options)
    }

    /// Cancellation-aware variant of [`Registry::get_provider`].
    pub fn get_provider_with_token<T: Send + Sync + 'static>(
        &self,
        token: &CancelToken,
        options: ProviderGetOptions,
    ) -> Result<Arc<T>> {
        let key = self.default_provider_key.read().clone();
        self.get_provider_by_key_with_token::<T>(token, &key, options)
    }

    /// Cancellation-aware variant of [`Registry::get_provider_by_key`].
    ///
    /// When the token fires before the factory finishes, the caller gets
    /// [`RegistryError::Cancelled`] immediately; the factory keeps running
    /// and, on success, still writes the cache afterwards.
    pub fn get_provider_by_key_with_token<T: Send + Sync + 'static>(
        &self,
        token: &CancelToken,
        key: &str,
        options: ProviderGetOptions,
    ) -> Result<Arc<T>> {
        let (partition, entry) = self.lookup_provider::<T>(key)?;
        let value = self.compute_provider(
            TypeId::of::<T>(),
            &partition,
            &entry,
            key,
            options.reload,
            token,
        )?;
        value
            .downcast::<T>()
            .map_err(|_| RegistryError::type_mismatch::<T>())
    }

    fn compute_provider(
        &self,
        type_id: TypeId,
        partition: &Partition<ProviderEntry>,
        entry: &Arc<ProviderEntry>,
        key: &str,
        reload: bool,
        token: &CancelToken,
    ) -> Result<ErasedValue> {
        let mut state = entry.state.lock();

        if !reload {
            if let Some(cached) = &state.cache {
                #[cfg(feature = "logging")]
                trace!(
                    target: "keyed_registry",
                    service = partition.type_name,
                    key = %key,
                    "provider cache hit"
                );
                return Ok(Arc::clone(cached));
            }
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "keyed_registry",
            service = partition.type_name,
            key = %key,
            reload,
            "running provider factory"
        );

        let slot = entry.launch(token);
        if !token.block_until(|| slot.lock().is_some()) {
            #[cfg(feature = "logging")]
            debug!(
                target: "keyed_registry",
                service = partition.type_name,
                key = %key,
                "provider retrieval cancelled; factory left running"
            );
            return Err(RegistryError::Cancelled);
        }

        let value = match slot.lock().take() {
            Some(Ok(value)) => value,
            Some(Err(err)) => return Err(RegistryError::ProviderFailed(err)),
            None => return Err(RegistryError::Cancelled),
        };

        if !entry.no_cache() {
            state.cache = Some(Arc::clone(&value));
        }
        let first_access = state.access.mark_accessed();
        drop(state);

        self.hooks.fire_after_provider_run(&AfterProviderRunContext {
            type_id,
            type_name: partition.type_name,
            key,
            provider: entry,
            value: &value,
        });
        if first_access {
            self.hooks.fire_after_first_access(&AfterFirstAccessContext {
                type_id,
                type_name: partition.type_name,
                key,
                entry: EntryRef::Provider(entry),
            });
        }

        Ok(value)
    }

    /// Panicking convenience for [`Registry::get_provider`].
    pub fn must_get_provider<T: Send + Sync + 'static>(
        &self,
        options: ProviderGetOptions,
    ) -> Arc<T> {
        self.get_provider::<T>(options)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Panicking convenience for [`Registry::get_provider_by_key`].
    pub fn must_get_provider_by_key<T: Send + Sync + 'static>(
        &self,
        key: &str,
        options: ProviderGetOptions,
    ) -> Arc<T> {
        self.get_provider_by_key::<T>(key, options)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// True when a provider is registered under the default alias.
    pub fn provider_exist<T: 'static>(&self) -> bool {
        let key = self.default_provider_key.read().clone();
        self.provider_exist_by_key::<T>(&key)
    }

    /// True when a provider is registered under `key`. A pure lookup: the
    /// factory is not run.
    pub fn provider_exist_by_key<T: 'static>(&self, key: &str) -> bool {
        self.provider_partition_of(TypeId::of::<T>())
            .is_some_and(|partition| partition.entries.contains_key(key))
    }

    /// Provider keys registered for `T`, excluding the default alias.
    pub fn list_provider_keys<T: 'static>(&self) -> Vec<String> {
        let default_key = self.default_provider_key.read().clone();
        let Some(partition) = self.provider_partition_of(TypeId::of::<T>()) else {
            return Vec::new();
        };
        let mut keys = Vec::with_capacity(partition.entries.len());
        partition.entries.for_each(|key, _| {
            if *key != default_key {
                keys.push(key.clone());
            }
            true
        });
        keys
    }

    /// Retrieve every provider value for `T`, excluding the default alias.
    /// The first failing provider aborts with its error.
    pub fn get_all_providers<T: Send + Sync + 'static>(
        &self,
        options: ProviderGetOptions,
    ) -> Result<Vec<Arc<T>>> {
        let default_key = self.default_provider_key.read().clone();
        let Some(partition) = self.provider_partition_of(TypeId::of::<T>()) else {
            return Ok(Vec::new());
        };
        let keys: Vec<String> = partition
            .entries
            .keys()
            .into_iter()
            .filter(|key| *key != default_key)
            .collect();
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get_provider_by_key::<T>(&key, options)?);
        }
        Ok(values)
    }

    /// Delete the default-alias provider for `T`.
    pub fn delete_provider<T: 'static>(&self) -> Result<()> {
        let key = self.default_provider_key.read().clone();
        self.delete_provider_by_key::<T>(&key)
    }

    /// Delete the provider registered under `key`. Providers have no release
    /// hook; the entry is simply unlinked.
    pub fn delete_provider_by_key<T: 'static>(&self, key: &str) -> Result<()> {
        let partition = self
            .provider_partition_of(TypeId::of::<T>())
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;
        partition
            .entries
            .remove(key)
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;

        #[cfg(feature = "logging")]
        debug!(
            target: "keyed_registry",
            service = partition.type_name,
            key = %key,
            "deleted provider"
        );
        Ok(())
    }

    // =========================================================================
    // Injection resolution contract
    // =========================================================================

    /// Resolve a value binding: `key` of `None` means the default alias.
    pub fn resolve_value<T: Send + Sync + 'static>(&self, key: Option<&str>) -> Result<Arc<T>> {
        match key {
            Some(key) => self.get_by_key::<T>(key),
            None => self.get::<T>(),
        }
    }

    /// Resolve a provider binding: `key` of `None` means the default alias.
    pub fn resolve_provider<T: Send + Sync + 'static>(
        &self,
        key: Option<&str>,
        reload: bool,
    ) -> Result<Arc<T>> {
        let options = ProviderGetOptions { reload };
        match key {
            Some(key) => self.get_provider_by_key::<T>(key, options),
            None => self.get_provider::<T>(options),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn value_partition<T: 'static>(&self) -> Arc<Partition<ValueEntry>> {
        Arc::clone(
            self.values
                .entry(TypeId::of::<T>())
                .or_insert_with(|| Arc::new(Partition::new::<T>()))
                .value(),
        )
    }

    fn provider_partition<T: 'static>(&self) -> Arc<Partition<ProviderEntry>> {
        Arc::clone(
            self.providers
                .entry(TypeId::of::<T>())
                .or_insert_with(|| Arc::new(Partition::new::<T>()))
                .value(),
        )
    }

    pub(crate) fn value_partition_of(
        &self,
        type_id: TypeId,
    ) -> Option<Arc<Partition<ValueEntry>>> {
        self.values.get(&type_id).map(|p| Arc::clone(p.value()))
    }

    pub(crate) fn provider_partition_of(
        &self,
        type_id: TypeId,
    ) -> Option<Arc<Partition<ProviderEntry>>> {
        self.providers.get(&type_id).map(|p| Arc::clone(p.value()))
    }

    pub(crate) fn value_partitions(&self) -> Vec<Arc<Partition<ValueEntry>>> {
        self.values.iter().map(|p| Arc::clone(p.value())).collect()
    }

    pub(crate) fn provider_partitions(&self) -> Vec<Arc<Partition<ProviderEntry>>> {
        self.providers.iter().map(|p| Arc::clone(p.value())).collect()
    }

    fn lookup_value<T: 'static>(
        &self,
        key: &str,
    ) -> Result<(Arc<Partition<ValueEntry>>, Arc<ValueEntry>)> {
        let partition = self
            .value_partition_of(TypeId::of::<T>())
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;
        let entry = partition
            .entries
            .get(key)
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;
        Ok((partition, entry))
    }

    fn lookup_provider<T: 'static>(
        &self,
        key: &str,
    ) -> Result<(Arc<Partition<ProviderEntry>>, Arc<ProviderEntry>)> {
        let partition = self
            .provider_partition_of(TypeId::of::<T>())
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;
        let entry = partition
            .entries
            .get(key)
            .ok_or_else(|| RegistryError::not_found::<T>(key))?;
        Ok((partition, entry))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("value_types", &self.values.len())
            .field("provider_types", &self.providers.len())
            .field("safe_delete", &self.safe_delete())
            .finish()
    }
}
