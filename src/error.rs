//! Error types for registry operations

use thiserror::Error;

/// Errors that can occur during registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No entry exists for the requested type/key pair
    #[error("value not found: {type_name} (key {key:?})")]
    NotFound {
        type_name: &'static str,
        key: String,
    },

    /// Caller attempted to register under the reserved default key
    #[error("invalid key: the default key is a reserved alias")]
    InvalidKey,

    /// Stored value does not match the requested type.
    ///
    /// Registration and lookup share the same `TypeId`, so this cannot be
    /// reached through the typed API; it guards the internal downcast.
    #[error("stored value does not match requested type {type_name}")]
    TypeMismatch { type_name: &'static str },

    /// A `BeforeDuplicateRegister` observer rejected the registration
    #[error("registration vetoed: {0}")]
    Vetoed(anyhow::Error),

    /// A provider factory returned an error
    #[error("provider failed: {0}")]
    ProviderFailed(anyhow::Error),

    /// The caller's cancellation token fired before the factory finished
    #[error("provider computation cancelled")]
    Cancelled,

    /// Ref counter dropped below zero.
    ///
    /// Never returned: an unpaired decrement is a contract violation and the
    /// registry panics with this as the payload.
    #[error("ref counter below zero")]
    RefCounterBelowZero,

    /// A reset task failed for one entry; siblings are unaffected
    #[error("teardown failed for {type_name} (key {key:?}): {source}")]
    Teardown {
        type_name: String,
        key: String,
        #[source]
        source: Box<RegistryError>,
    },
}

impl RegistryError {
    /// Create a `NotFound` error for a type/key pair
    #[inline]
    pub fn not_found<T: 'static>(key: &str) -> Self {
        Self::NotFound {
            type_name: std::any::type_name::<T>(),
            key: key.to_owned(),
        }
    }

    /// Create a `TypeMismatch` error for a type
    #[inline]
    pub fn type_mismatch<T: 'static>() -> Self {
        Self::TypeMismatch {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// True if this is a `NotFound` error (used by optional bindings)
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
