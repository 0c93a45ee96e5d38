//! Fetch contract
//!
//! Every resource source (object store reader, secret manager, vault client,
//! token endpoint) implements [`ResourceFetcher`]. Vendor-specific failures are
//! reported as `anyhow::Error`; the caching layer wraps them uniformly.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;

use crate::parameter::ParameterSet;
use crate::resource::Resource;

pub trait ResourceFetcher<T>: Send + Sync {
    fn fetch(
        &self,
        parameters: &ParameterSet,
    ) -> impl Future<Output = Result<Resource<T>>> + Send;
}

impl<T, F> ResourceFetcher<T> for Arc<F>
where
    F: ResourceFetcher<T>,
{
    fn fetch(
        &self,
        parameters: &ParameterSet,
    ) -> impl Future<Output = Result<Resource<T>>> + Send {
        self.as_ref().fetch(parameters)
    }
}

/// Fetcher backed by an async closure, see [`fetch_fn`].
#[derive(Clone)]
pub struct FnFetcher<F>(F);

/// Adapts `Fn(ParameterSet) -> impl Future<Output = anyhow::Result<Resource<T>>>`
/// into a [`ResourceFetcher`].
pub fn fetch_fn<F>(f: F) -> FnFetcher<F> {
    FnFetcher(f)
}

impl<T, F, Fut> ResourceFetcher<T> for FnFetcher<F>
where
    F: Fn(ParameterSet) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resource<T>>> + Send,
{
    fn fetch(
        &self,
        parameters: &ParameterSet,
    ) -> impl Future<Output = Result<Resource<T>>> + Send {
        (self.0)(parameters.clone())
    }
}
