use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_PARAMETER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Parameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParameterId(u64);

impl ParameterId {
    fn next() -> Self {
        Self(NEXT_PARAMETER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Typed descriptor of one configurable input, e.g. a region or a secret id.
///
/// Parameters are compared by identity: two parameters declared with the same
/// name in different modules never collide. Declare them once, usually in a
/// `once_cell::sync::Lazy` static, and reuse the same instance.
///
/// ```
/// use once_cell::sync::Lazy;
/// use resource_cache::Parameter;
///
/// static SECRET_ID: Lazy<Parameter<String>> = Lazy::new(|| Parameter::required("secret_id"));
/// static TIMEOUT_SECONDS: Lazy<Parameter<u64>> =
///     Lazy::new(|| Parameter::optional("timeout_seconds").with_default(30));
/// ```
pub struct Parameter<T> {
    id: ParameterId,
    name: &'static str,
    required: bool,
    sensitive: bool,
    default: Option<T>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Parameter<T> {
    fn new(name: &'static str, required: bool) -> Self {
        Self {
            id: ParameterId::next(),
            name,
            required,
            sensitive: false,
            default: None,
            _value: PhantomData,
        }
    }

    pub fn required(name: &'static str) -> Self {
        Self::new(name, true)
    }

    pub fn optional(name: &'static str) -> Self {
        Self::new(name, false)
    }

    /// Value returned by lookups when the set carries no value for this parameter.
    pub fn with_default(mut self, default: T) -> Self {
        self.default = Some(default);
        self
    }

    /// Marks the value as secret: it is redacted from any textual representation.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn id(&self) -> ParameterId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn default_value(&self) -> Option<&T> {
        self.default.as_ref()
    }
}

impl<T> fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("required", &self.required)
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

/// Type-erased parameter value stored inside a `ParameterSet`.
///
/// Implemented for every `Eq + Hash + Debug` type, which is what a cache key needs.
pub trait ParameterValue: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_value(&self, other: &dyn ParameterValue) -> bool;
    fn hash_value(&self, state: &mut dyn Hasher);
}

impl<T> ParameterValue for T
where
    T: Any + fmt::Debug + Eq + Hash + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_value(&self, other: &dyn ParameterValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn hash_value(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }
}

/// One frozen entry of a `ParameterSet`.
#[derive(Clone)]
pub(crate) struct StoredValue {
    pub(crate) name: &'static str,
    pub(crate) sensitive: bool,
    pub(crate) value: Arc<dyn ParameterValue>,
}

impl PartialEq for StoredValue {
    fn eq(&self, other: &Self) -> bool {
        self.value.eq_value(other.value.as_ref())
    }
}

impl Eq for StoredValue {}

impl Hash for StoredValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash_value(state);
    }
}

impl fmt::Debug for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sensitive {
            f.write_str("****")
        } else {
            write!(f, "{:?}", self.value)
        }
    }
}
