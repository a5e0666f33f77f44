use thiserror::Error;
use url::Url;

use crate::fetch::{FetchError, FetchedResponse};
use crate::pipeline::{PipelineError, StageContext};

/// The external entity a fetch pipeline runs on behalf of: the cached
/// conditional-GET validators from the (out-of-scope) persistence layer.
#[derive(Debug, Clone, Default)]
pub struct FeedRecord {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FeedRecord {
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// Terminal result of the feed fetch pipeline.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The document was downloaded and recognized by a format detector.
    Fetched {
        response: FetchedResponse,
        feed: Box<feed_rs::model::Feed>,
    },
    /// The origin answered `304 Not Modified`. Carries the possibly-rotated
    /// validators so the caller's cache record can update atomically.
    NotModified {
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

/// A feed located by the discovery pipeline.
#[derive(Debug, Clone)]
pub struct DiscoveredFeed {
    pub url: Url,
    pub title: Option<String>,
}

/// Errors specific to the feed pipelines.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The input could not be canonicalized into an http(s) URL at all.
    #[error("invalid feed URL: {url}")]
    InvalidUrl { url: String },
    /// The origin is rate limiting or fronted by a bot challenge; retrying
    /// immediately would only amplify load. Recorded for a later re-scan.
    #[error("request guarded by rate limiting or a bot challenge (status {status})")]
    Guarded { status: u16 },
    /// Transport-level failure from the fetch engine.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Mutable scratchpad for one pipeline invocation. Exclusively owned by that
/// invocation; lives exactly as long as it does.
pub struct FeedContext<R> {
    /// The URL the next fetch stage targets. Restart stages repoint this.
    pub request_url: Url,
    /// The fetched document, once a fetch stage has run.
    pub response: Option<FetchedResponse>,
    /// Cached validators, when the caller has any.
    pub record: Option<FeedRecord>,
    pub result: Option<R>,
    pub error: Option<PipelineError>,
    depth: u32,
    last_status: Option<u16>,
}

impl<R> FeedContext<R> {
    pub fn new(request_url: Url, record: Option<FeedRecord>) -> Self {
        Self {
            request_url,
            response: None,
            record,
            result: None,
            error: None,
            depth: 0,
            last_status: None,
        }
    }

    /// Stores a fetched response and remembers its status for diagnostics
    /// that outlive the response itself.
    pub fn set_response(&mut self, response: FetchedResponse) {
        self.last_status = Some(response.status().as_u16());
        self.response = Some(response);
    }

    /// Records a terminal failure, classifying guard statuses (403/429/503
    /// behind exhausted retries) distinctly from plain transport errors.
    pub fn fail_fetch(&mut self, err: FetchError) {
        if let Some(status) = err.status() {
            self.last_status = Some(status);
            if matches!(status, 403 | 429 | 503) {
                self.error = Some(PipelineError::stage(FeedError::Guarded { status }));
                return;
            }
        }
        self.error = Some(PipelineError::stage(FeedError::Fetch(err)));
    }

    /// Clears fetch state for a restart against a new URL.
    pub fn repoint(&mut self, url: Url) {
        self.request_url = url;
        self.response = None;
    }
}

impl<R: Send> StageContext for FeedContext<R> {
    type Output = R;

    fn take_output(&mut self) -> Option<R> {
        self.result.take()
    }

    fn take_error(&mut self) -> Option<PipelineError> {
        self.error.take()
    }

    fn is_settled(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    fn observed_status(&self) -> Option<u16> {
        self.response
            .as_ref()
            .map(|r| r.status().as_u16())
            .or(self.last_status)
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn bump_depth(&mut self) {
        self.depth += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_statuses_classify_distinctly() {
        let mut ctx: FeedContext<()> =
            FeedContext::new(Url::parse("https://example.com/feed").unwrap(), None);
        ctx.fail_fetch(FetchError::Unreachable {
            url: "https://example.com/feed".into(),
            attempts: 4,
            source: Box::new(FetchError::HttpStatus(429)),
        });
        let err = ctx.take_error().unwrap();
        assert!(matches!(
            err.downcast_ref::<FeedError>(),
            Some(FeedError::Guarded { status: 429 })
        ));
    }

    #[test]
    fn non_guard_failures_stay_fetch_errors() {
        let mut ctx: FeedContext<()> =
            FeedContext::new(Url::parse("https://example.com/feed").unwrap(), None);
        ctx.fail_fetch(FetchError::Unreachable {
            url: "https://example.com/feed".into(),
            attempts: 4,
            source: Box::new(FetchError::HttpStatus(500)),
        });
        let err = ctx.take_error().unwrap();
        assert!(matches!(
            err.downcast_ref::<FeedError>(),
            Some(FeedError::Fetch(_))
        ));
        // Status survives into the context diagnostics either way.
        assert_eq!(ctx.observed_status(), Some(500));
    }
}
