use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

/// How a resource decides whether it may still be served.
#[derive(Clone)]
pub enum Validity {
    /// Object bytes, static secrets: valid forever.
    Permanent,
    /// Valid strictly before the given instant.
    ExpiresAt(Instant),
    /// Re-evaluated on every access.
    Check(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        match self {
            Validity::Permanent => true,
            Validity::ExpiresAt(at) => Instant::now() < *at,
            Validity::Check(check) => check(),
        }
    }
}

impl fmt::Debug for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validity::Permanent => f.write_str("Permanent"),
            Validity::ExpiresAt(at) => f.debug_tuple("ExpiresAt").field(at).finish(),
            Validity::Check(_) => f.write_str("Check(..)"),
        }
    }
}

/// A fetched value together with its validity check and sensitivity flag.
///
/// The value never changes after construction. [`is_valid`](Self::is_valid)
/// only reports staleness; replacing a stale value is the cache's job. Clones
/// share the same value, so a caller holding an older clone keeps a usable
/// value after the cache has moved on.
pub struct Resource<T> {
    value: Arc<T>,
    validity: Validity,
    sensitive: bool,
}

impl<T> Resource<T> {
    pub fn new(value: T, validity: Validity, sensitive: bool) -> Self {
        Self { value: Arc::new(value), validity, sensitive }
    }

    pub fn permanent(value: T, sensitive: bool) -> Self {
        Self::new(value, Validity::Permanent, sensitive)
    }

    pub fn expiring(value: T, expires_at: Instant, sensitive: bool) -> Self {
        Self::new(value, Validity::ExpiresAt(expires_at), sensitive)
    }

    pub fn with_validity_check<C>(value: T, check: C, sensitive: bool) -> Self
    where
        C: Fn() -> bool + Send + Sync + 'static,
    {
        Self::new(value, Validity::Check(Arc::new(check)), sensitive)
    }

    /// Same value, different validity. Used to shorten how long a cache serves it.
    pub fn revalidated(&self, validity: Validity) -> Self {
        Self { value: self.value.clone(), validity, sensitive: self.sensitive }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn shared_value(&self) -> Arc<T> {
        self.value.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    pub fn expires_at(&self) -> Option<Instant> {
        match self.validity {
            Validity::ExpiresAt(at) => Some(at),
            _ => None,
        }
    }

    /// Whether both handles share the same fetched value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            validity: self.validity.clone(),
            sensitive: self.sensitive,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Resource");
        if self.sensitive {
            debug.field("value", &"****");
        } else {
            debug.field("value", &self.value);
        }
        debug
            .field("validity", &self.validity)
            .field("sensitive", &self.sensitive)
            .finish()
    }
}
