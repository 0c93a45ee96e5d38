use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ResourceError, Result};
use crate::parameter::parameter::{Parameter, ParameterId, ParameterValue, StoredValue};

/// Immutable set of parameter values.
///
/// A `ParameterSet` configures a fetch and doubles as its cache key: equality and
/// hashing are structural over `(parameter identity, value)` entries, so sets
/// built with the same content always collide and differently configured sets
/// never do. Cloning is cheap, the entries are shared.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ParameterSet {
    entries: Arc<BTreeMap<ParameterId, StoredValue>>,
}

impl ParameterSet {
    pub fn builder() -> ParameterSetBuilder {
        ParameterSetBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Starts a builder pre-filled with this set's entries.
    pub fn to_builder(&self) -> ParameterSetBuilder {
        ParameterSetBuilder { entries: self.entries.as_ref().clone() }
    }

    /// Configured value, falling back to the parameter's declared default.
    pub fn get<T>(&self, parameter: &Parameter<T>) -> Option<T>
    where
        T: ParameterValue + Clone,
    {
        self.lookup(parameter)
            .cloned()
            .or_else(|| parameter.default_value().cloned())
    }

    /// Like [`get`](Self::get), but an absent value is a configuration error.
    pub fn get_required<T>(&self, parameter: &Parameter<T>) -> Result<T>
    where
        T: ParameterValue + Clone,
    {
        self.get(parameter)
            .ok_or(ResourceError::MissingParameter { name: parameter.name() })
    }

    /// Whether a value was configured explicitly. Defaults do not count.
    pub fn contains<T>(&self, parameter: &Parameter<T>) -> bool {
        self.entries.contains_key(&parameter.id())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup<T: ParameterValue>(&self, parameter: &Parameter<T>) -> Option<&T> {
        self.entries
            .get(&parameter.id())
            .and_then(|stored| stored.value.as_any().downcast_ref::<T>())
    }
}

/// Renders `{name=value, ...}` with sensitive values replaced by `****`.
impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, stored) in self.entries.values().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", stored.name, stored)?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParameterSet{self}")
    }
}

/// Accumulates parameter/value pairs, then freezes them with [`build`](Self::build).
#[derive(Default)]
pub struct ParameterSetBuilder {
    entries: BTreeMap<ParameterId, StoredValue>,
}

impl ParameterSetBuilder {
    /// Sets the value of `parameter`, replacing any earlier value.
    pub fn add<T: ParameterValue>(mut self, parameter: &Parameter<T>, value: T) -> Self {
        self.entries.insert(
            parameter.id(),
            StoredValue {
                name: parameter.name(),
                sensitive: parameter.is_sensitive(),
                value: Arc::new(value),
            },
        );
        self
    }

    pub fn remove<T>(mut self, parameter: &Parameter<T>) -> Self {
        self.entries.remove(&parameter.id());
        self
    }

    pub fn build(self) -> ParameterSet {
        ParameterSet { entries: Arc::new(self.entries) }
    }
}

