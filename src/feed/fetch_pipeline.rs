//! The feed fetch pipeline: conditional GET, plain fetch, guard detection,
//! per-format detectors, and a bounded meta-refresh restart.
//!
//! Detectors decline rather than fail: a parse error just hands the response
//! to the next stage. When nothing claims it, the engine synthesizes the
//! "no matching parser" error carrying the last HTTP status.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::client::Fetcher;
use crate::fetch::{FetchOptions, FetchedResponse};
use crate::pipeline::{Flow, Pipeline, PipelineError, Stage};
use crate::urls::{prepare_url, PreparePolicy};

use super::context::{FeedContext, FeedError, FeedRecord, FetchOutcome};
use super::html::{feed_link_tags, meta_refresh_target};

type FetchContext = FeedContext<FetchOutcome>;

/// Challenge-page markers from the common interstitial vendors. Scanning is
/// bounded to the body head; real challenges front-load these.
const GUARD_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf-chl",
    "just a moment",
    "checking your browser",
    "ddos-guard",
];
const GUARD_SCAN_LIMIT: usize = 4096;

/// Builds the fetch chain for one `Fetcher`. The pipeline is reusable across
/// invocations; each invocation brings its own context.
pub fn fetch_feed_pipeline(fetcher: Arc<Fetcher>) -> Pipeline<FetchContext> {
    let refresh_fetcher = Arc::clone(&fetcher);
    Pipeline::new(vec![
        Box::new(ConditionalFetch {
            fetcher: Arc::clone(&fetcher),
        }),
        Box::new(ResponseFetch { fetcher }),
        Box::new(GuardDetect),
        Box::new(XmlFeedDetect),
        Box::new(JsonFeedDetect),
        Box::new(MetaRefreshFollow {
            fetcher: refresh_fetcher,
        }),
    ])
}

/// Runs the fetch pipeline against one URL.
pub async fn fetch_feed(
    fetcher: Arc<Fetcher>,
    url: &str,
    record: Option<FeedRecord>,
) -> Result<FetchOutcome, PipelineError> {
    let request_url = prepare_url(url, None, PreparePolicy::CanonicalizeOnly).ok_or_else(|| {
        PipelineError::stage(FeedError::InvalidUrl {
            url: url.to_owned(),
        })
    })?;
    let pipeline = fetch_feed_pipeline(fetcher);
    let mut ctx = FeedContext::new(request_url, record);
    pipeline.run(&mut ctx).await
}

/// Issues a conditional GET when cached validators exist. A 304 settles the
/// invocation with rotated validators; a full answer is stashed for the
/// detectors downstream (no second fetch).
struct ConditionalFetch {
    fetcher: Arc<Fetcher>,
}

impl Stage<FetchContext> for ConditionalFetch {
    fn name(&self) -> &'static str {
        "conditional-fetch"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FetchContext,
        _chain: &'a Pipeline<FetchContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            if ctx.response.is_some() {
                return Ok(Flow::Continue);
            }
            let Some(record) = ctx.record.as_ref().filter(|r| r.has_validators()) else {
                return Ok(Flow::Continue);
            };

            let options = FetchOptions::new()
                .with_validators(record.etag.clone(), record.last_modified.clone());
            match self.fetcher.fetch_url(ctx.request_url.as_str(), &options).await {
                Ok(response) if response.is_not_modified() => {
                    tracing::debug!(url = %ctx.request_url, "not modified");
                    ctx.result = Some(FetchOutcome::NotModified {
                        etag: response.etag().map(str::to_owned),
                        last_modified: response.last_modified().map(str::to_owned),
                    });
                    Ok(Flow::Done)
                }
                Ok(response) => {
                    ctx.set_response(response);
                    Ok(Flow::Continue)
                }
                Err(err) => {
                    ctx.fail_fetch(err);
                    Ok(Flow::Done)
                }
            }
        })
    }
}

/// Plain fetch for invocations without validators (and for restarts, which
/// clear the stashed response).
struct ResponseFetch {
    fetcher: Arc<Fetcher>,
}

impl Stage<FetchContext> for ResponseFetch {
    fn name(&self) -> &'static str {
        "response-fetch"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FetchContext,
        _chain: &'a Pipeline<FetchContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            if ctx.response.is_some() {
                return Ok(Flow::Continue);
            }
            match self
                .fetcher
                .fetch_url(ctx.request_url.as_str(), &FetchOptions::new())
                .await
            {
                Ok(response) => {
                    ctx.set_response(response);
                    Ok(Flow::Continue)
                }
                Err(err) => {
                    ctx.fail_fetch(err);
                    Ok(Flow::Done)
                }
            }
        })
    }
}

/// Flags challenge interstitials served with a success status. Status-level
/// guarding (403/429/503 behind exhausted retries) is classified by
/// [`FeedContext::fail_fetch`] before this stage ever sees it.
struct GuardDetect;

impl Stage<FetchContext> for GuardDetect {
    fn name(&self) -> &'static str {
        "guard-detect"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FetchContext,
        _chain: &'a Pipeline<FetchContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            let Some(response) = ctx.response.as_ref() else {
                return Ok(Flow::Continue);
            };
            if !looks_like_html(response) {
                return Ok(Flow::Continue);
            }
            let head: String = response
                .text()
                .chars()
                .take(GUARD_SCAN_LIMIT)
                .collect::<String>()
                .to_ascii_lowercase();
            if GUARD_MARKERS.iter().any(|marker| head.contains(marker)) {
                let status = response.status().as_u16();
                tracing::debug!(url = %response.final_url(), status, "challenge page detected");
                ctx.error = Some(PipelineError::stage(FeedError::Guarded { status }));
                return Ok(Flow::Done);
            }
            Ok(Flow::Continue)
        })
    }
}

/// Recognizes RSS/Atom/RDF documents and parses them through feed-rs.
struct XmlFeedDetect;

impl Stage<FetchContext> for XmlFeedDetect {
    fn name(&self) -> &'static str {
        "xml-feed-detect"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FetchContext,
        _chain: &'a Pipeline<FetchContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            let Some(response) = ctx.response.as_ref() else {
                return Ok(Flow::Continue);
            };
            if !looks_like_xml_feed(response) {
                return Ok(Flow::Continue);
            }
            match feed_rs::parser::parse(response.text().as_bytes()) {
                Ok(feed) => {
                    settle_with_feed(ctx, feed);
                    Ok(Flow::Done)
                }
                Err(err) => {
                    tracing::trace!(url = %response.final_url(), error = %err, "not an XML feed");
                    Ok(Flow::Continue)
                }
            }
        })
    }
}

/// Recognizes JSON Feed documents (also parsed through feed-rs).
struct JsonFeedDetect;

impl Stage<FetchContext> for JsonFeedDetect {
    fn name(&self) -> &'static str {
        "json-feed-detect"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FetchContext,
        _chain: &'a Pipeline<FetchContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            let Some(response) = ctx.response.as_ref() else {
                return Ok(Flow::Continue);
            };
            let content_type = response.content_type().unwrap_or("").to_ascii_lowercase();
            let body_sniff = response.text().trim_start().starts_with('{');
            if !content_type.contains("json") && !body_sniff {
                return Ok(Flow::Continue);
            }
            match feed_rs::parser::parse(response.text().as_bytes()) {
                Ok(feed) => {
                    settle_with_feed(ctx, feed);
                    Ok(Flow::Done)
                }
                Err(_) => Ok(Flow::Continue),
            }
        })
    }
}

/// Follows an HTML meta-refresh (or an advertised feed link) by restarting
/// the whole chain against the new URL, bounded by the context depth.
struct MetaRefreshFollow {
    fetcher: Arc<Fetcher>,
}

impl Stage<FetchContext> for MetaRefreshFollow {
    fn name(&self) -> &'static str {
        "meta-refresh-follow"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut FetchContext,
        chain: &'a Pipeline<FetchContext>,
    ) -> BoxFuture<'a, Result<Flow, PipelineError>> {
        Box::pin(async move {
            let Some(response) = ctx.response.as_ref() else {
                return Ok(Flow::Continue);
            };
            if !looks_like_html(response) {
                return Ok(Flow::Continue);
            }

            let base = response.final_url().clone();
            let raw_target = meta_refresh_target(response.text())
                .or_else(|| feed_link_tags(response.text()).into_iter().next());
            let Some(raw_target) = raw_target else {
                return Ok(Flow::Continue);
            };

            // Full validation again: restart targets are attacker-influenced
            // exactly like redirects.
            let policy = if self.fetcher.config().allow_loopback {
                PreparePolicy::ValidateAllowLoopback
            } else {
                PreparePolicy::Validate
            };
            let Some(target) = prepare_url(&raw_target, Some(&base), policy) else {
                tracing::debug!(url = %base, target = %raw_target, "refresh target rejected");
                return Ok(Flow::Continue);
            };
            if target == ctx.request_url {
                return Ok(Flow::Continue);
            }

            tracing::debug!(from = %ctx.request_url, to = %target, "following document refresh");
            ctx.repoint(target);
            chain.rerun(ctx).await?;
            Ok(Flow::Done)
        })
    }
}

fn settle_with_feed(ctx: &mut FetchContext, feed: feed_rs::model::Feed) {
    if let Some(response) = ctx.response.take() {
        ctx.result = Some(FetchOutcome::Fetched {
            response,
            feed: Box::new(feed),
        });
    }
}

fn looks_like_html(response: &FetchedResponse) -> bool {
    let content_type = response.content_type().unwrap_or("").to_ascii_lowercase();
    if content_type.contains("text/html") || content_type.contains("application/xhtml") {
        return true;
    }
    let head: String = response.text().trim_start().chars().take(15).collect();
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

fn looks_like_xml_feed(response: &FetchedResponse) -> bool {
    let content_type = response.content_type().unwrap_or("").to_ascii_lowercase();
    if content_type.contains("xml") {
        return true;
    }
    let head = response.text().trim_start();
    head.starts_with("<?xml")
        || head.starts_with("<rss")
        || head.starts_with("<feed")
        || head.starts_with("<rdf:RDF")
}
