//! Reconciles a feed's self-declared URL against the URL it was fetched from.
//!
//! Feeds frequently declare a canonical `<link rel="self">` that differs from
//! the address the subscription actually used: mirrors, CDN frontends, moved
//! hosts. Preferring the declared URL keeps subscriptions pointed at the
//! origin, but only when we can verify the declared address serves the same
//! feed. This function is total: every doubt resolves to the URL the response
//! actually came from.

use url::Url;

use crate::client::Fetcher;
use crate::fetch::{FetchOptions, FetchedResponse, RetryPolicy};
use crate::urls::{is_absolute_url, is_safe_public_url_with, is_similar_url, prepare_url, PreparePolicy};

/// Picks the URL a subscription should use going forward.
///
/// Checks run cheapest-first; the first four never touch the network. The
/// self-declared URL wins only when a live probe shows it serves the same
/// content (by redirect target, normalized similarity, or body hash).
pub async fn reconcile_feed_url(
    fetcher: &Fetcher,
    self_url: Option<&str>,
    fetched: &FetchedResponse,
) -> Url {
    let response_url = fetched.final_url().clone();

    let Some(self_url) = self_url.map(str::trim).filter(|s| !s.is_empty()) else {
        tracing::trace!(url = %response_url, "no self-declared url, keeping response url");
        return response_url;
    };

    if self_url == response_url.as_str() {
        tracing::trace!(url = %response_url, "self-declared url matches response url");
        return response_url;
    }

    if !is_absolute_url(self_url) {
        tracing::debug!(self_url, "self-declared url is not absolute, keeping response url");
        return response_url;
    }

    if !is_safe_public_url_with(self_url, fetcher.config().allow_loopback) {
        tracing::debug!(self_url, "self-declared url fails safety check, keeping response url");
        return response_url;
    }

    // The form returned when a check below decides to trust the declaration.
    // The declared URL itself, not wherever its probe redirects: switching a
    // subscription means switching to the advertised address.
    let Some(declared) = prepare_url(self_url, None, PreparePolicy::CanonicalizeOnly) else {
        tracing::debug!(self_url, "self-declared url does not canonicalize, keeping response url");
        return response_url;
    };

    // Single probe, no retries: this runs after every successful feed fetch
    // and must not amplify traffic toward a possibly-dead declared host.
    let options = FetchOptions {
        retry: RetryPolicy::none(),
        ..FetchOptions::new()
    };
    let probe = match fetcher.fetch_url(self_url, &options).await {
        Ok(probe) => probe,
        Err(err) => {
            tracing::debug!(self_url, error = %err, "self-declared url unfetchable, keeping response url");
            return response_url;
        }
    };

    if !probe.is_success() {
        tracing::debug!(self_url, status = probe.status().as_u16(), "self-declared url not 2xx, keeping response url");
        return response_url;
    }

    if probe.final_url() == &response_url {
        tracing::trace!(self_url, "self-declared url resolves to the response url");
        return response_url;
    }

    if is_similar_url(self_url, response_url.as_str()) {
        tracing::debug!(self_url, "self-declared url similar to response url, switching");
        return declared;
    }

    if probe.content_hash() == fetched.content_hash() {
        tracing::debug!(self_url, "self-declared url serves identical content, switching");
        return declared;
    }

    tracing::debug!(self_url, "self-declared url serves different content, keeping response url");
    response_url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FetcherConfig;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;

    fn fetcher() -> Fetcher {
        Fetcher::new(FetcherConfig::default()).unwrap()
    }

    fn response_at(url: &str) -> FetchedResponse {
        FetchedResponse::new(
            Url::parse(url).unwrap(),
            StatusCode::OK,
            HeaderMap::new(),
            "<rss/>".to_owned(),
            "a".repeat(64),
            6,
        )
    }

    // The first four checks must resolve without any network access, so they
    // are testable against an unroutable response URL.

    #[tokio::test]
    async fn missing_or_blank_self_url_keeps_response_url() {
        let fetcher = fetcher();
        let fetched = response_at("https://example.com/feed.xml");
        for declared in [None, Some(""), Some("   ")] {
            let picked = reconcile_feed_url(&fetcher, declared, &fetched).await;
            assert_eq!(picked.as_str(), "https://example.com/feed.xml");
        }
    }

    #[tokio::test]
    async fn identical_self_url_short_circuits() {
        let fetcher = fetcher();
        let fetched = response_at("https://example.com/feed.xml");
        let picked =
            reconcile_feed_url(&fetcher, Some("https://example.com/feed.xml"), &fetched).await;
        assert_eq!(picked.as_str(), "https://example.com/feed.xml");
    }

    #[tokio::test]
    async fn relative_and_non_http_self_urls_are_ignored() {
        let fetcher = fetcher();
        let fetched = response_at("https://example.com/feed.xml");
        for declared in ["/feed.xml", "feed.xml", "ftp://example.com/feed", "not a url"] {
            let picked = reconcile_feed_url(&fetcher, Some(declared), &fetched).await;
            assert_eq!(picked.as_str(), "https://example.com/feed.xml");
        }
    }

    #[tokio::test]
    async fn unsafe_self_url_is_never_dereferenced() {
        let fetcher = fetcher();
        let fetched = response_at("https://example.com/feed.xml");
        for declared in [
            "http://127.0.0.1/feed.xml",
            "http://10.1.2.3/feed.xml",
            "http://169.254.169.254/latest/meta-data",
        ] {
            let picked = reconcile_feed_url(&fetcher, Some(declared), &fetched).await;
            assert_eq!(picked.as_str(), "https://example.com/feed.xml");
        }
    }
}
