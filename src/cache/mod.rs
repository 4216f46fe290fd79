//! In-memory query cache for remote data.
//!
//! This module provides the keyed store behind every cached fetch:
//! - Serves data inside its stale window without touching the network
//! - Coalesces concurrent requests for the same key into one fetch
//! - Retries transient failures with exponential backoff
//! - Keeps the last good data when a refetch fails (stale-while-error)
//! - Evicts entries that went unused past their gc time

mod entry;
mod layer;
mod options;
mod traits;

pub use layer::QueryCache;
pub use options::{CacheConfig, QueryOptions};
pub use traits::{DataSource, QueryResult, QueryStatus};
