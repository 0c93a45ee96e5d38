//! Typed parameters and the immutable parameter sets used as fetch input and cache key.

pub mod parameter;
pub mod parameter_set;

pub use parameter::{Parameter, ParameterId, ParameterValue};
pub use parameter_set::{ParameterSet, ParameterSetBuilder};
