//! Keyed single-flight cache and the access token cache built on it.

pub mod resource_cache;
pub mod token;
pub mod token_cache;
pub mod token_context;

pub use resource_cache::ResourceCache;
pub use token::AccessToken;
pub use token_cache::{AccessTokenCache, AccessTokenCacheBuilder};
