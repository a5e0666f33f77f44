//! The feed discovery pipeline: given any URL, locate machine-readable feeds.
//!
//! Stage order mirrors signal strength: a document that already is a feed,
//! then HTTP `Link` headers, then `<link rel="alternate">` tags, then a
//! last-resort probe of feed-ish anchors and well-known paths. Every
//! candidate is canonicalized, safety-checked, deduplicated, and verified by
//! actually parsing it as a feed before it is returned.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use url::Url;

use crate::client::Fetcher;
use crate::fetch::{FetchOptions, FetchedResponse, RetryPolicy};
use crate::pipeline::{Flow, Pipeline, PipelineError, Stage};
use crate::urls::{is_similar_url, prepare_url, PreparePolicy};

use super::context::{DiscoveredFeed, FeedContext, FeedError};
use super::html::{feed_link_tags, feedish_anchors, FEED_MIME_HINTS, WELL_KNOWN_FEED_PATHS};

type FindContext = FeedContext<Vec<DiscoveredFeed>>;

/// Parallel probes per candidate batch. Keeps discovery polite even when a
/// page advertises a pile of candidate links.
const PROBE_CONCURRENCY: usize = 4;
/// Anchor candidates considered per page.
const MAX_ANCHOR_CANDIDATES: usize = 8;

/// Builds the discovery chain for one `Fetcher`.
pub fn find_feeds_pipeline(fetcher: Arc<Fetcher>) -> Pipeline<FindContext> {
    Pipeline::new(vec![
        Box::new(PageFetch {
            fetcher: Arc::clone(&fetcher),
        }),
        Box::new(LinkHeaderScan {
            fetcher: Arc::clone(&fetcher),
        }),
        Box::new(LinkTagScan {
            fetcher: Arc::clone(&fetcher),
        }),
        Box::new(AnchorProbe { fetcher }),
    ])
}

/// Runs the discovery pipeline against one URL.
pub async fn find_feeds(
    fetcher: Arc<Fetcher>,
    url: &str,
) -> Result<Vec<DiscoveredFeed>, PipelineError> {
    let request_url = prepare_url(url, None, PreparePolicy::CanonicalizeOnly).ok_or_else(|| {
        PipelineError::stage(FeedError::InvalidUrl {
            url: url.to_owned(),
        })
    })?;
    let pipeline = find_feeds_pipeline(fetcher);
    let mut ctx = FeedContext::new(request_url, None);
    pipeline.run(&mut ctx).await
}

/// Fetches the submitted URL. If the document already parses as a feed, the
/// answer is the URL itself; otherwise the response is stashed for the
/// scanning stages.
struct PageFetch {
    fetcher: Arc<Fetcher>,
}

impl Stage<FindContext> for PageFetch {
    fn name(&self) -> &'static str {
        "page-fetch"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FindContext,
        _chain: &'a Pipeline<FindContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            if ctx.response.is_none() {
                match self
                    .fetcher
                    .fetch_url(ctx.request_url.as_str(), &FetchOptions::new())
                    .await
                {
                    Ok(response) => ctx.set_response(response),
                    Err(err) => {
                        ctx.fail_fetch(err);
                        return Ok(Flow::Done);
                    }
                }
            }

            let Some(response) = ctx.response.as_ref() else {
                return Ok(Flow::Continue);
            };
            if !response.is_success() {
                return Ok(Flow::Continue);
            }
            if let Ok(feed) = feed_rs::parser::parse(response.text().as_bytes()) {
                ctx.result = Some(vec![DiscoveredFeed {
                    url: response.final_url().clone(),
                    title: feed.title.map(|t| t.content),
                }]);
                return Ok(Flow::Done);
            }
            Ok(Flow::Continue)
        })
    }
}

/// Reads feed candidates out of HTTP `Link` response headers
/// (`<url>; rel="alternate"; type="application/rss+xml"`).
struct LinkHeaderScan {
    fetcher: Arc<Fetcher>,
}

impl Stage<FindContext> for LinkHeaderScan {
    fn name(&self) -> &'static str {
        "link-header-scan"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FindContext,
        _chain: &'a Pipeline<FindContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            let Some(response) = ctx.response.as_ref() else {
                return Ok(Flow::Continue);
            };
            let base = response.final_url().clone();

            let mut raw_candidates = Vec::new();
            for value in response.headers().get_all("link") {
                let Ok(value) = value.to_str() else { continue };
                raw_candidates.extend(feed_candidates_from_link_header(value));
            }
            if raw_candidates.is_empty() {
                return Ok(Flow::Continue);
            }

            let candidates = prepare_candidates(&self.fetcher, &base, raw_candidates);
            let found = probe_candidates(&self.fetcher, candidates).await;
            if found.is_empty() {
                return Ok(Flow::Continue);
            }
            ctx.result = Some(found);
            Ok(Flow::Done)
        })
    }
}

/// Scans the HTML head for `<link rel="alternate">` feed advertisements.
struct LinkTagScan {
    fetcher: Arc<Fetcher>,
}

impl Stage<FindContext> for LinkTagScan {
    fn name(&self) -> &'static str {
        "link-tag-scan"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FindContext,
        _chain: &'a Pipeline<FindContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            let Some(response) = ctx.response.as_ref() else {
                return Ok(Flow::Continue);
            };
            let base = response.final_url().clone();
            let raw_candidates = feed_link_tags(response.text());
            if raw_candidates.is_empty() {
                return Ok(Flow::Continue);
            }

            let candidates = prepare_candidates(&self.fetcher, &base, raw_candidates);
            let found = probe_candidates(&self.fetcher, candidates).await;
            if found.is_empty() {
                return Ok(Flow::Continue);
            }
            ctx.result = Some(found);
            Ok(Flow::Done)
        })
    }
}

/// Last resort: probe feed-ish anchors plus the well-known paths on the
/// page's origin.
struct AnchorProbe {
    fetcher: Arc<Fetcher>,
}

impl Stage<FindContext> for AnchorProbe {
    fn name(&self) -> &'static str {
        "anchor-probe"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FindContext,
        _chain: &'a Pipeline<FindContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            let Some(response) = ctx.response.as_ref() else {
                return Ok(Flow::Continue);
            };
            let base = response.final_url().clone();

            let mut raw_candidates = feedish_anchors(response.text(), MAX_ANCHOR_CANDIDATES);
            for path in WELL_KNOWN_FEED_PATHS {
                raw_candidates.push((*path).to_owned());
            }

            let candidates = prepare_candidates(&self.fetcher, &base, raw_candidates);
            let found = probe_candidates(&self.fetcher, candidates).await;
            if found.is_empty() {
                return Ok(Flow::Continue);
            }
            ctx.result = Some(found);
            Ok(Flow::Done)
        })
    }
}

/// Canonicalizes, safety-checks, and deduplicates raw candidate hrefs
/// against each other. Unsafe or malformed candidates drop silently.
fn prepare_candidates(fetcher: &Fetcher, base: &Url, raw: Vec<String>) -> Vec<Url> {
    let policy = if fetcher.config().allow_loopback {
        PreparePolicy::ValidateAllowLoopback
    } else {
        PreparePolicy::Validate
    };

    let mut candidates: Vec<Url> = Vec::new();
    for href in raw {
        let Some(url) = prepare_url(&href, Some(base), policy) else {
            tracing::debug!(candidate = %href, "discovery candidate rejected");
            continue;
        };
        let duplicate = candidates
            .iter()
            .any(|existing| is_similar_url(existing.as_str(), url.as_str()));
        if !duplicate {
            candidates.push(url);
        }
    }
    candidates
}

/// Fetches candidates with bounded parallelism, keeping the ones that parse
/// as a feed. Probes use a single attempt: discovery should stay cheap, and
/// the submitted page itself already went through the retrying path.
async fn probe_candidates(fetcher: &Fetcher, candidates: Vec<Url>) -> Vec<DiscoveredFeed> {
    let options = FetchOptions {
        retry: RetryPolicy::none(),
        ..FetchOptions::new()
    };

    stream::iter(candidates)
        .map(|candidate| {
            let options = options.clone();
            async move {
                let response = fetcher.fetch_url(candidate.as_str(), &options).await.ok()?;
                if !response.is_success() {
                    return None;
                }
                verify_feed(&response)
            }
        })
        .buffer_unordered(PROBE_CONCURRENCY)
        .filter_map(|found| async move { found })
        .collect()
        .await
}

fn verify_feed(response: &FetchedResponse) -> Option<DiscoveredFeed> {
    let feed = feed_rs::parser::parse(response.text().as_bytes()).ok()?;
    Some(DiscoveredFeed {
        url: response.final_url().clone(),
        title: feed.title.map(|t| t.content),
    })
}

/// Parses one `Link` header value into feed candidate targets: segments with
/// `rel="alternate"` (or `rel=alternate`) and a feed MIME type parameter.
fn feed_candidates_from_link_header(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    for segment in value.split(',') {
        let mut parts = segment.split(';');
        let Some(target) = parts.next() else { continue };
        let target = target.trim();
        let Some(target) = target.strip_prefix('<').and_then(|t| t.strip_suffix('>')) else {
            continue;
        };

        let mut rel_alternate = false;
        let mut feed_type = false;
        for param in parts {
            let Some((key, val)) = param.split_once('=') else { continue };
            let key = key.trim().to_ascii_lowercase();
            let val = val.trim().trim_matches('"').to_ascii_lowercase();
            match key.as_str() {
                "rel" => rel_alternate = val.split_whitespace().any(|r| r == "alternate"),
                "type" => feed_type = FEED_MIME_HINTS.iter().any(|mime| val.starts_with(mime)),
                _ => {}
            }
        }
        if rel_alternate && feed_type {
            out.push(target.to_owned());
        }
    }
    out
}
