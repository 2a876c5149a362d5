//! Resolving registered objects into consumer structs
//!
//! Builds on the resolver contract ([`Registry::resolve_value`] and
//! [`Registry::resolve_provider`]): each field of a consumer type gets a
//! binding fixed at compile time, choosing the value or the provider side,
//! an optional key, `reload` for providers, and `optional` to tolerate a
//! missing registration.
//!
//! # Examples
//!
//! ```rust
//! use keyed_registry::{AddOptions, Inject, Registry, impl_inject};
//! use keyed_registry::inject::value;
//! use std::sync::Arc;
//!
//! struct Config {
//!     url: String,
//! }
//!
//! struct App {
//!     config: Arc<Config>,
//! }
//!
//! impl_inject!(App {
//!     config: value::<Config>().key("primary"),
//! });
//!
//! let registry = Registry::new();
//! registry
//!     .add("primary", Config { url: "postgres://localhost".into() }, AddOptions::new())
//!     .unwrap();
//!
//! let app = App::inject(&registry).unwrap();
//! assert_eq!(app.config.url, "postgres://localhost");
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Result;
use crate::registry::Registry;

/// Implemented by types whose fields can be resolved from a registry.
///
/// Use [`impl_inject!`](crate::impl_inject) to derive an implementation from
/// per-field bindings.
pub trait Inject: Sized {
    fn inject(registry: &Registry) -> Result<Self>;
}

/// A field binding resolvable against a registry.
pub trait ResolveField {
    type Output;
    fn resolve(&self, registry: &Registry) -> Result<Self::Output>;
}

/// Binding to an eagerly-registered value.
pub struct ValueBinding<T> {
    key: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

/// Binding to a provider computation.
pub struct ProviderBinding<T> {
    key: Option<String>,
    reload: bool,
    _marker: PhantomData<fn() -> T>,
}

/// Binding wrapper that resolves "not found" to `None` instead of failing.
pub struct OptionalBinding<B>(B);

/// Bind a field to the value registered for `T` (default alias unless a key
/// is given).
pub fn value<T>() -> ValueBinding<T> {
    ValueBinding {
        key: None,
        _marker: PhantomData,
    }
}

/// Bind a field to the provider registered for `T` (default alias unless a
/// key is given).
pub fn provider<T>() -> ProviderBinding<T> {
    ProviderBinding {
        key: None,
        reload: false,
        _marker: PhantomData,
    }
}

impl<T> ValueBinding<T> {
    /// Resolve under `key` instead of the default alias.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Skip the field when no entry is registered.
    pub fn optional(self) -> OptionalBinding<Self> {
        OptionalBinding(self)
    }
}

impl<T> ProviderBinding<T> {
    /// Resolve under `key` instead of the default alias.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Recompute even when the provider holds a cached value.
    pub fn reload(mut self) -> Self {
        self.reload = true;
        self
    }

    /// Skip the field when no entry is registered.
    pub fn optional(self) -> OptionalBinding<Self> {
        OptionalBinding(self)
    }
}

impl<T: Send + Sync + 'static> ResolveField for ValueBinding<T> {
    type Output = Arc<T>;

    fn resolve(&self, registry: &Registry) -> Result<Arc<T>> {
        registry.resolve_value::<T>(self.key.as_deref())
    }
}

impl<T: Send + Sync + 'static> ResolveField for ProviderBinding<T> {
    type Output = Arc<T>;

    fn resolve(&self, registry: &Registry) -> Result<Arc<T>> {
        registry.resolve_provider::<T>(self.key.as_deref(), self.reload)
    }
}

impl<B: ResolveField> ResolveField for OptionalBinding<B> {
    type Output = Option<B::Output>;

    /// Only "not found" is tolerated; a failing provider or a veto still
    /// propagates.
    fn resolve(&self, registry: &Registry) -> Result<Option<B::Output>> {
        match self.0.resolve(registry) {
            Ok(resolved) => Ok(Some(resolved)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Implement [`Inject`] for a struct from per-field binding expressions.
///
/// Fields bound with `value`/`provider` must be `Arc<T>`; fields bound with
/// `.optional()` must be `Option<Arc<T>>`.
#[macro_export]
macro_rules! impl_inject {
    ($target:ty { $($field:ident: $binding:expr),+ $(,)? }) => {
        impl $crate::Inject for $target {
            fn inject(registry: &$crate::Registry) -> $crate::Result<Self> {
                Ok(Self {
                    $($field: $crate::inject::ResolveField::resolve(&$binding, registry)?,)+
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::registry::{AddOptions, ProviderOptions};

    #[derive(Debug)]
    struct Config {
        url: String,
    }

    #[derive(Debug)]
    struct Pool {
        size: u32,
    }

    #[derive(Debug)]
    struct Metrics;

    #[derive(Debug)]
    struct Deps {
        config: Arc<Config>,
        pool: Arc<Pool>,
        metrics: Option<Arc<Metrics>>,
    }

    crate::impl_inject!(Deps {
        config: value::<Config>().key("primary"),
        pool: provider::<Pool>().key("pool"),
        metrics: value::<Metrics>().optional(),
    });

    fn registry_with_core() -> Registry {
        let registry = Registry::new();
        registry
            .add(
                "primary",
                Config {
                    url: "postgres://localhost".into(),
                },
                AddOptions::new(),
            )
            .unwrap();
        registry
            .add_provider("pool", || Ok(Pool { size: 8 }), ProviderOptions::new())
            .unwrap();
        registry
    }

    #[test]
    fn test_inject_resolves_fields() {
        let registry = registry_with_core();
        let deps = Deps::inject(&registry).unwrap();

        assert_eq!(deps.config.url, "postgres://localhost");
        assert_eq!(deps.pool.size, 8);
        assert!(deps.metrics.is_none());
    }

    #[test]
    fn test_optional_present() {
        let registry = registry_with_core();
        registry
            .add("metrics", Metrics, AddOptions::new().set_default())
            .unwrap();

        let deps = Deps::inject(&registry).unwrap();
        assert!(deps.metrics.is_some());
    }

    #[test]
    fn test_missing_required_field_fails() {
        let registry = Registry::new();
        let err = Deps::inject(&registry).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_optional_does_not_mask_provider_failure() {
        #[derive(Debug)]
        struct Flaky;
        #[derive(Debug)]
        struct FlakyDeps {
            flaky: Option<Arc<Flaky>>,
        }

        crate::impl_inject!(FlakyDeps {
            flaky: provider::<Flaky>().key("flaky").optional(),
        });

        let registry = Registry::new();
        registry
            .add_provider(
                "flaky",
                || Err::<Flaky, _>(anyhow::anyhow!("backend down")),
                ProviderOptions::new(),
            )
            .unwrap();

        let err = FlakyDeps::inject(&registry).unwrap_err();
        assert!(matches!(err, RegistryError::ProviderFailed(_)));
    }

    #[test]
    fn test_provider_reload_binding() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct Stamp(u32);
        struct StampDeps {
            stamp: Arc<Stamp>,
        }

        crate::impl_inject!(StampDeps {
            stamp: provider::<Stamp>().key("stamp").reload(),
        });

        static RUNS: AtomicU32 = AtomicU32::new(0);
        let registry = Registry::new();
        registry
            .add_provider(
                "stamp",
                || Ok(Stamp(RUNS.fetch_add(1, Ordering::SeqCst))),
                ProviderOptions::new(),
            )
            .unwrap();

        let first = StampDeps::inject(&registry).unwrap();
        let second = StampDeps::inject(&registry).unwrap();
        assert_ne!(first.stamp.0, second.stamp.0);
    }
}
