use std::io;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use url::Url;

use super::error::{io_error_kind, FetchError};

/// Default body ceiling: 100 MiB.
pub const DEFAULT_MAX_CONTENT_SIZE: u64 = 100 * 1024 * 1024;

/// Statuses retried by default. 403 is included because feed hosts behind
/// bot-filters commonly clear after a User-Agent rotation; the engine rotates
/// agents on every 403 attempt.
const DEFAULT_RETRY_STATUSES: &[u16] = &[403, 408, 429, 500, 502, 503, 504, 521];

const DEFAULT_RETRY_IO_KINDS: &[io::ErrorKind] = &[
    io::ErrorKind::TimedOut,
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::ConnectionRefused,
    io::ErrorKind::BrokenPipe,
    io::ErrorKind::UnexpectedEof,
    io::ErrorKind::NetworkUnreachable,
    io::ErrorKind::HostUnreachable,
];

/// Predicate consulted after response headers arrive and the final URL is
/// known, before any body byte is downloaded. Returning `false` aborts the
/// fetch with [`FetchError::Aborted`].
pub type ContinuePredicate = dyn Fn(&Url, StatusCode, &HeaderMap) -> bool + Send + Sync;

/// Retry behavior for one fetch. Defaults are baked in; override per call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries beyond the first attempt (3 retries = 4 tries).
    pub limit: u32,
    /// Statuses that abort the attempt without reading the body and retry.
    pub status_codes: Vec<u16>,
    /// Transport error kinds considered transient.
    pub error_kinds: Vec<io::ErrorKind>,
    /// Base delay unit; first backoff is one unit, doubling per attempt.
    pub backoff_base: Duration,
    /// Exponential growth stops here (jitter still applies on top).
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            status_codes: DEFAULT_RETRY_STATUSES.to_vec(),
            error_kinds: DEFAULT_RETRY_IO_KINDS.to_vec(),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(64),
        }
    }
}

impl RetryPolicy {
    /// No retries at all; single attempt.
    pub fn none() -> Self {
        Self {
            limit: 0,
            ..Self::default()
        }
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.status_codes.contains(&status.as_u16())
    }

    /// Classifies an error as transient. Timeouts and connect failures count
    /// regardless of the kind set; everything else is matched against the
    /// configured I/O kinds found in the source chain.
    pub fn is_retryable_error(&self, err: &FetchError) -> bool {
        match err {
            FetchError::HttpStatus(status) => self.status_codes.contains(status),
            FetchError::Network(err) => {
                if err.is_timeout() || err.is_connect() {
                    return true;
                }
                io_error_kind(err).is_some_and(|kind| self.error_kinds.contains(&kind))
            }
            _ => false,
        }
    }

    /// Exponential backoff with jitter: `min(base * 2^attempt, cap)` plus a
    /// random slice of one base unit, so synchronized callers spread out
    /// instead of retrying in lockstep.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.backoff_cap);
        let jitter_ceiling = self.backoff_base.as_millis().max(1) as u64;
        let jitter = rand::rng().random_range(0..jitter_ceiling);
        exp + Duration::from_millis(jitter)
    }
}

/// Per-call options for [`Fetcher::fetch_url`](crate::Fetcher::fetch_url).
#[derive(Clone)]
pub struct FetchOptions {
    pub retry: RetryPolicy,
    /// Extra request headers, merged over the engine's defaults.
    pub headers: HeaderMap,
    /// Cached validator for conditional GET; sent as `If-None-Match`.
    pub etag: Option<String>,
    /// Cached validator for conditional GET; sent as `If-Modified-Since`.
    pub last_modified: Option<String>,
    /// Body ceiling in bytes. Checked against the declared Content-Length
    /// before the body, and against the streamed count during it.
    pub max_content_size: u64,
    /// Content-Type prefixes that abort the fetch without a body read.
    pub blocked_content_types: Vec<String>,
    /// See [`ContinuePredicate`].
    pub should_continue: Option<Arc<ContinuePredicate>>,
}

impl std::fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("retry", &self.retry)
            .field("headers", &self.headers)
            .field("etag", &self.etag)
            .field("last_modified", &self.last_modified)
            .field("max_content_size", &self.max_content_size)
            .field("blocked_content_types", &self.blocked_content_types)
            .field("should_continue", &self.should_continue.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
            headers: HeaderMap::new(),
            etag: None,
            last_modified: None,
            max_content_size: DEFAULT_MAX_CONTENT_SIZE,
            blocked_content_types: vec!["audio/".into(), "video/".into()],
            should_continue: None,
        }
    }

    /// Attaches cached validators for conditional GET.
    pub fn with_validators(mut self, etag: Option<String>, last_modified: Option<String>) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self
    }

    pub(crate) fn is_blocked_content_type(&self, content_type: &str) -> bool {
        let normalized = content_type.trim().to_ascii_lowercase();
        self.blocked_content_types
            .iter()
            .any(|prefix| normalized.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_statuses() {
        let policy = RetryPolicy::default();
        for status in [403, 408, 429, 500, 502, 503, 504, 521] {
            assert!(
                policy.is_retryable_status(StatusCode::from_u16(status).unwrap()),
                "{status} should be retryable"
            );
        }
        for status in [200, 304, 301, 404, 410] {
            assert!(
                !policy.is_retryable_status(StatusCode::from_u16(status).unwrap()),
                "{status} should not be retryable"
            );
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        let base = Duration::from_secs(1);
        for attempt in 0..12 {
            let delay = policy.backoff_delay(attempt);
            let exp = base
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(policy.backoff_cap);
            assert!(delay >= exp, "attempt {attempt}: delay below exponential floor");
            assert!(
                delay < exp + base,
                "attempt {attempt}: jitter exceeds one base unit"
            );
        }
    }

    #[test]
    fn blocked_content_type_prefixes() {
        let options = FetchOptions::new();
        assert!(options.is_blocked_content_type("audio/mpeg"));
        assert!(options.is_blocked_content_type("VIDEO/mp4; codecs=avc1"));
        assert!(!options.is_blocked_content_type("application/rss+xml"));
        assert!(!options.is_blocked_content_type("text/html"));
    }

    #[test]
    fn unsafe_and_guard_errors_never_retry() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_retryable_error(&FetchError::UnsafeUrl {
            url: "http://10.0.0.1/".into()
        }));
        assert!(!policy.is_retryable_error(&FetchError::TooManyRedirects));
        assert!(!policy.is_retryable_error(&FetchError::DeclaredTooLarge {
            declared: 1,
            limit: 0
        }));
        assert!(policy.is_retryable_error(&FetchError::HttpStatus(503)));
    }
}
