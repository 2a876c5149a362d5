//! Process-wide default registry
//!
//! The registry is an explicit object; this module is a convenience wrapper
//! around one lazily-created default instance for programs that want
//! package-level calls instead of threading a handle around. Everything here
//! delegates to [`Registry::global`].

use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::error::Result;
use crate::hooks::{
    AfterAddContext, AfterFirstAccessContext, AfterProviderRunContext,
    BeforeDuplicateRegisterContext,
};
use crate::registry::{
    AddOptions, DeleteOptions, ProviderGetOptions, ProviderOptions, Registry, ResetOptions,
};
use crate::token::CancelToken;

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

impl Registry {
    /// The process-wide default instance.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }
}

/// Register a value in the default registry.
pub fn add<T: Send + Sync + 'static>(
    key: impl Into<String>,
    value: T,
    options: AddOptions,
) -> Result<()> {
    Registry::global().add(key, value, options)
}

/// Retrieve the default-alias value for `T` from the default registry.
pub fn get<T: Send + Sync + 'static>() -> Result<Arc<T>> {
    Registry::global().get::<T>()
}

/// Retrieve the value registered under `key` from the default registry.
pub fn get_by_key<T: Send + Sync + 'static>(key: &str) -> Result<Arc<T>> {
    Registry::global().get_by_key::<T>(key)
}

/// Panicking convenience for [`get`].
pub fn must_get<T: Send + Sync + 'static>() -> Arc<T> {
    Registry::global().must_get::<T>()
}

/// Panicking convenience for [`get_by_key`].
pub fn must_get_by_key<T: Send + Sync + 'static>(key: &str) -> Arc<T> {
    Registry::global().must_get_by_key::<T>(key)
}

/// True when a default-alias value is registered for `T`.
pub fn exist<T: 'static>() -> bool {
    Registry::global().exist::<T>()
}

/// True when a value is registered under `key`.
pub fn exist_by_key<T: 'static>(key: &str) -> bool {
    Registry::global().exist_by_key::<T>(key)
}

/// Keys registered for `T`, excluding the default alias.
pub fn list_keys<T: 'static>() -> Vec<String> {
    Registry::global().list_keys::<T>()
}

/// Every value registered for `T`, excluding the default alias.
pub fn get_all<T: Send + Sync + 'static>() -> Vec<Arc<T>> {
    Registry::global().get_all::<T>()
}

/// Delete the default-alias value for `T`.
pub fn delete<T: 'static>(options: DeleteOptions) -> Result<()> {
    Registry::global().delete::<T>(options)
}

/// Delete the value registered under `key`.
pub fn delete_by_key<T: 'static>(key: &str, options: DeleteOptions) -> Result<()> {
    Registry::global().delete_by_key::<T>(key, options)
}

/// Release one reference on the default-alias value for `T`.
pub fn deduct_ref_count<T: 'static>() -> Result<()> {
    Registry::global().deduct_ref_count::<T>()
}

/// Release one reference on the value registered under `key`.
pub fn deduct_ref_count_by_key<T: 'static>(key: &str) -> Result<()> {
    Registry::global().deduct_ref_count_by_key::<T>(key)
}

/// Register a synchronous provider in the default registry.
pub fn add_provider<T, F>(key: impl Into<String>, factory: F, options: ProviderOptions) -> Result<()>
where
    T: Send + Sync + 'static,
    F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
{
    Registry::global().add_provider(key, factory, options)
}

/// Register a cancellation-aware provider in the default registry.
pub fn add_cancellable_provider<T, F>(
    key: impl Into<String>,
    factory: F,
    options: ProviderOptions,
) -> Result<()>
where
    T: Send + Sync + 'static,
    F: Fn(&CancelToken) -> anyhow::Result<T> + Send + Sync + 'static,
{
    Registry::global().add_cancellable_provider(key, factory, options)
}

/// Retrieve the default-alias provider value for `T`.
pub fn get_provider<T: Send + Sync + 'static>(options: ProviderGetOptions) -> Result<Arc<T>> {
    Registry::global().get_provider::<T>(options)
}

/// Retrieve the provider value registered under `key`.
pub fn get_provider_by_key<T: Send + Sync + 'static>(
    key: &str,
    options: ProviderGetOptions,
) -> Result<Arc<T>> {
    Registry::global().get_provider_by_key::<T>(key, options)
}

/// Cancellation-aware variant of [`get_provider`].
pub fn get_provider_with_token<T: Send + Sync + 'static>(
    token: &CancelToken,
    options: ProviderGetOptions,
) -> Result<Arc<T>> {
    Registry::global().get_provider_with_token::<T>(token, options)
}

/// Cancellation-aware variant of [`get_provider_by_key`].
pub fn get_provider_by_key_with_token<T: Send + Sync + 'static>(
    token: &CancelToken,
    key: &str,
    options: ProviderGetOptions,
) -> Result<Arc<T>> {
    Registry::global().get_provider_by_key_with_token::<T>(token, key, options)
}

/// Panicking convenience for [`get_provider`].
pub fn must_get_provider<T: Send + Sync + 'static>(options: ProviderGetOptions) -> Arc<T> {
    Registry::global().must_get_provider::<T>(options)
}

/// Panicking convenience for [`get_provider_by_key`].
pub fn must_get_provider_by_key<T: Send + Sync + 'static>(
    key: &str,
    options: ProviderGetOptions,
) -> Arc<T> {
    Registry::global().must_get_provider_by_key::<T>(key, options)
}

/// True when a default-alias provider is registered for `T`.
pub fn provider_exist<T: 'static>() -> bool {
    Registry::global().provider_exist::<T>()
}

/// True when a provider is registered under `key`.
pub fn provider_exist_by_key<T: 'static>(key: &str) -> bool {
    Registry::global().provider_exist_by_key::<T>(key)
}

/// Provider keys registered for `T`, excluding the default alias.
pub fn list_provider_keys<T: 'static>() -> Vec<String> {
    Registry::global().list_provider_keys::<T>()
}

/// Retrieve every provider value for `T`, excluding the default alias.
pub fn get_all_providers<T: Send + Sync + 'static>(
    options: ProviderGetOptions,
) -> Result<Vec<Arc<T>>> {
    Registry::global().get_all_providers::<T>(options)
}

/// Delete the default-alias provider for `T`.
pub fn delete_provider<T: 'static>() -> Result<()> {
    Registry::global().delete_provider::<T>()
}

/// Delete the provider registered under `key`.
pub fn delete_provider_by_key<T: 'static>(key: &str) -> Result<()> {
    Registry::global().delete_provider_by_key::<T>(key)
}

/// Tear down every entry in the default registry.
pub fn reset(options: ResetOptions) -> Vec<crate::RegistryError> {
    Registry::global().reset(options)
}

/// Toggle safe-delete mode on the default registry.
pub fn set_safe_delete(enabled: bool) {
    Registry::global().set_safe_delete(enabled);
}

/// Cap reset concurrency on the default registry (0 restores the default).
pub fn set_reset_max_concurrent(cap: usize) {
    Registry::global().set_reset_max_concurrent(cap);
}

/// Change the default-alias sentinel for values on the default registry.
pub fn set_default_value_key(key: impl Into<String>) {
    Registry::global().set_default_value_key(key);
}

/// Change the default-alias sentinel for providers on the default registry.
pub fn set_default_provider_key(key: impl Into<String>) {
    Registry::global().set_default_provider_key(key);
}

/// Observe successful registrations on the default registry.
pub fn on_after_add(hook: impl Fn(&AfterAddContext<'_>) + Send + Sync + 'static) {
    Registry::global().on_after_add(hook);
}

/// Observe fresh provider computations on the default registry.
pub fn on_after_provider_run(hook: impl Fn(&AfterProviderRunContext<'_>) + Send + Sync + 'static) {
    Registry::global().on_after_provider_run(hook);
}

/// Observe first accesses on the default registry.
pub fn on_after_first_access(hook: impl Fn(&AfterFirstAccessContext<'_>) + Send + Sync + 'static) {
    Registry::global().on_after_first_access(hook);
}

/// Install the duplicate-registration veto on the default registry.
pub fn on_before_duplicate_register(
    hook: impl Fn(&BeforeDuplicateRegisterContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
) {
    Registry::global().on_before_duplicate_register(hook);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct GlobalWidget(u32);

    #[test]
    #[serial]
    fn test_global_add_get_delete() {
        add("gw", GlobalWidget(3), AddOptions::new()).unwrap();
        assert!(exist_by_key::<GlobalWidget>("gw"));
        assert_eq!(get_by_key::<GlobalWidget>("gw").unwrap().0, 3);

        delete_by_key::<GlobalWidget>("gw", DeleteOptions::new()).unwrap();
        assert!(!exist_by_key::<GlobalWidget>("gw"));
    }

    #[test]
    #[serial]
    fn test_global_reset() {
        add("gw", GlobalWidget(1), AddOptions::new()).unwrap();
        add_provider("gp", || Ok(GlobalWidget(2)), ProviderOptions::new()).unwrap();

        let errors = reset(ResetOptions::new());
        assert!(errors.is_empty());
        assert!(!exist_by_key::<GlobalWidget>("gw"));
        assert!(!provider_exist_by_key::<GlobalWidget>("gp"));
    }

    #[test]
    #[serial]
    fn test_global_same_instance() {
        assert!(std::ptr::eq(Registry::global(), Registry::global()));
    }
}
