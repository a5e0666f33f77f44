//! Secure retrieval and orchestration core for a feed-aggregation backend.
//!
//! Feed URLs come from end users and from parsed documents, which makes every
//! input attacker-influenced. This crate provides the pieces a feed backend
//! builds on top of:
//!
//! - [`urls`] - URL safety checks and canonicalization (SSRF policy)
//! - [`fetch`] - streaming fetch engine with retry, backoff, redirect
//!   validation, and size/content-type guards
//! - [`pipeline`] - generic ordered middleware-chain executor
//! - [`feed`] - concrete fetch/discovery pipelines and canonical-URL
//!   reconciliation
//!
//! The HTTP client is explicitly constructed and shared by reference: build a
//! [`Fetcher`] once at startup and hand it to every pipeline.
//!
//! # Example
//!
//! ```no_run
//! use feedrake::{Fetcher, FetcherConfig, FetchOptions};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let fetcher = Fetcher::new(FetcherConfig::default())?;
//! let response = fetcher
//!     .fetch_url("https://example.com/feed.xml", &FetchOptions::default())
//!     .await?;
//! println!("{} bytes from {}", response.content_bytes(), response.final_url());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod feed;
pub mod fetch;
pub mod pipeline;
pub mod urls;

pub use client::{Fetcher, FetcherConfig};
pub use feed::{
    fetch_feed, find_feeds, reconcile_feed_url, DiscoveredFeed, FeedContext, FeedError,
    FeedRecord, FetchOutcome,
};
pub use fetch::{FetchError, FetchOptions, FetchedResponse, RetryPolicy};
pub use pipeline::{Flow, Pipeline, PipelineError, Stage, StageContext};
