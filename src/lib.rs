//! # Resource Cache Library
//!
//! Lets a database driver obtain expensive, externally sourced resources
//! (cloud credentials, secrets, short-lived access tokens) through one request
//! interface, without redundant fetches and without callers waiting on token
//! expiry.
//!
//! Modules:
//! - `parameter`: typed parameters and immutable parameter sets (fetch input and cache key)
//! - `resource`: fetched values with validity and sensitivity
//! - `sources`: the fetch contract and an HTTP token fetcher
//! - `cache`: keyed single-flight cache and the background-refreshing access token cache
//! - `config`: YAML settings for token refresh, logging and metrics
//!
//! ```no_run
//! use once_cell::sync::Lazy;
//! use resource_cache::{fetch_fn, Parameter, ParameterSet, Resource, ResourceCache};
//!
//! static SECRET_ID: Lazy<Parameter<String>> = Lazy::new(|| Parameter::required("secret_id"));
//!
//! # async fn run() -> Result<(), resource_cache::ResourceError> {
//! let secrets = ResourceCache::new(fetch_fn(|parameters: ParameterSet| async move {
//!     let id = parameters.get_required(&SECRET_ID)?;
//!     Ok::<_, anyhow::Error>(Resource::permanent(format!("secret for {id}"), true))
//! }));
//!
//! let parameters = ParameterSet::builder().add(&SECRET_ID, "x".to_string()).build();
//! let secret = secrets.request(&parameters).await?;
//! # let _ = secret;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod helpers;
pub mod observability;
pub mod parameter;
pub mod resilience;
pub mod resource;
pub mod sources;
pub mod utils;

#[cfg(test)]
mod tests;


pub use crate::cache::{AccessToken, AccessTokenCache, AccessTokenCacheBuilder, ResourceCache};
pub use crate::error::{ResourceError, Result};
pub use crate::parameter::{Parameter, ParameterSet, ParameterSetBuilder};
pub use crate::resource::{Resource, Validity};
pub use crate::sources::{fetch_fn, ResourceFetcher};
