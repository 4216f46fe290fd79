//! Client-side data layer for the services marketplace API.
//!
//! - [`cache`]: keyed query cache with stale-while-revalidate and request coalescing
//! - [`query`]: dependency-driven list query without caching
//! - [`retry`]: error classification and exponential backoff
//! - [`normalize`]: bare array / envelope response normalization
//! - [`validation`]: memoized form field validation
//! - [`client`]: reqwest-based API client, plain and cached

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod normalize;
pub mod query;
pub mod retry;
pub mod validation;

pub use cache::{CacheConfig, DataSource, QueryCache, QueryOptions, QueryResult, QueryStatus};
pub use client::{ApiClient, CachedApiClient, Envelope, ListResult, QueryKey, RequestKey};
pub use config::Config;
pub use error::FetchError;
pub use normalize::{normalize, NormalizedList, ResponseShape};
pub use query::{ListQuery, ListState};
pub use retry::{classify, ErrorClass, RetryPolicy};
pub use validation::{Rule, Validator};
