//! Streaming fetch engine.
//!
//! [`Fetcher::fetch_url`](crate::Fetcher::fetch_url) is the single retry site
//! in the crate: callers above it never re-retry the same request. Bodies for
//! retryable or blocked responses are never downloaded, and the content hash
//! is computed over the live stream rather than a buffered string, since many
//! feeds run concurrently near the size ceiling.

mod engine;
pub(crate) mod error;
mod options;
mod response;
mod stream;

pub use error::FetchError;
pub use options::{ContinuePredicate, FetchOptions, RetryPolicy, DEFAULT_MAX_CONTENT_SIZE};
pub use response::FetchedResponse;
