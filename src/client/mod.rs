//! HTTP boundary for the marketplace API.

mod api_types;
mod cached;
mod http;
mod key;
#[cfg(test)]
mod test_server;

pub use api_types::Envelope;
pub use cached::{CachedApiClient, ListResult};
pub use http::ApiClient;
pub use key::{QueryKey, RequestKey};
