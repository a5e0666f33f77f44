//! Concrete feed pipelines built on the generic [`Pipeline`](crate::pipeline)
//! executor: fetching and parsing a known feed URL, discovering feeds behind
//! an arbitrary URL, and reconciling a feed's self-declared URL with the one
//! it was fetched from.

mod context;
mod fetch_pipeline;
mod find_pipeline;
mod html;
mod reconcile;

pub use context::{DiscoveredFeed, FeedContext, FeedError, FeedRecord, FetchOutcome};
pub use fetch_pipeline::{fetch_feed, fetch_feed_pipeline};
pub use find_pipeline::{find_feeds, find_feeds_pipeline};
pub use reconcile::reconcile_feed_url;
