//! Resource sources: the fetch contract and the fetchers shipped with the crate.

pub mod fetch;
pub mod http;

pub use fetch::{fetch_fn, FnFetcher, ResourceFetcher};
pub use http::HttpTokenFetcher;
