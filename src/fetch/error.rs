use std::error::Error as StdError;
use thiserror::Error;

/// Errors surfaced by [`Fetcher::fetch_url`](crate::Fetcher::fetch_url).
///
/// The taxonomy separates pre-flight rejections (never retried, never shown to
/// the remote party) from transport failures (retried per policy and wrapped
/// once the budget is spent) and content guards (non-retryable by nature).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL failed canonicalization or the SSRF safety gate. Raised before
    /// any socket opens, or when a redirect hop targets a blocked range.
    #[error("unsafe URL rejected: {url}")]
    UnsafeUrl { url: String },
    /// The retry budget is exhausted; wraps the last observed failure.
    #[error("unreachable after {attempts} attempts: {url}")]
    Unreachable {
        url: String,
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },
    /// Response Content-Type matched the blocked set (audio/video by default).
    #[error("blocked content type: {content_type}")]
    BlockedContentType { content_type: String },
    /// Declared Content-Length exceeded the ceiling; no body bytes were read.
    #[error("declared content length {declared} exceeds limit of {limit} bytes")]
    DeclaredTooLarge { declared: u64, limit: u64 },
    /// The streamed byte count crossed the ceiling mid-download (covers
    /// chunked transfers that carry no Content-Length).
    #[error("body exceeded limit of {limit} bytes after {read} streamed bytes")]
    StreamTooLarge { read: u64, limit: u64 },
    /// The caller's `should_continue` predicate declined the body download.
    #[error("download aborted by caller for {url}")]
    Aborted { url: String },
    /// The redirect chain exceeded the configured hop limit.
    #[error("too many redirects")]
    TooManyRedirects,
    /// A status from the retryable set; only ever observed wrapped inside
    /// [`FetchError::Unreachable`].
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Network-level failure (DNS, connect, TLS, timeout, mid-body reset).
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl FetchError {
    /// True when the fetch ended because a redirect hop was rejected by the
    /// safety gate.
    pub fn is_unsafe(&self) -> bool {
        matches!(self, FetchError::UnsafeUrl { .. })
            || matches!(self, FetchError::Unreachable { source, .. } if source.is_unsafe())
    }

    /// The terminal HTTP status, if the failure wraps one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus(status) => Some(*status),
            FetchError::Unreachable { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Marker injected by the redirect policy when a hop fails the safety gate.
/// Travels through reqwest's error source chain and is mapped back to
/// [`FetchError::UnsafeUrl`] by the engine.
#[derive(Debug, Error)]
#[error("redirect to unsafe URL: {0}")]
pub(crate) struct UnsafeRedirect(pub String);

/// Marker injected by the redirect policy on hop-limit overflow.
#[derive(Debug, Error)]
#[error("redirect limit exceeded")]
pub(crate) struct RedirectLimit;

/// Maps a reqwest redirect error back to the policy rejection that caused it,
/// if any.
pub(crate) fn redirect_rejection(err: &reqwest::Error) -> Option<FetchError> {
    if !err.is_redirect() {
        return None;
    }
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(unsafe_hop) = cause.downcast_ref::<UnsafeRedirect>() {
            return Some(FetchError::UnsafeUrl {
                url: unsafe_hop.0.clone(),
            });
        }
        if cause.downcast_ref::<RedirectLimit>().is_some() {
            return Some(FetchError::TooManyRedirects);
        }
        source = cause.source();
    }
    None
}

/// Walks an error's source chain for the underlying I/O error kind, used by
/// the retry policy to classify transport failures.
pub(crate) fn io_error_kind(err: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_detection_sees_through_wrapping() {
        let inner = FetchError::UnsafeUrl {
            url: "http://10.0.0.1/".into(),
        };
        let wrapped = FetchError::Unreachable {
            url: "https://example.com/".into(),
            attempts: 4,
            source: Box::new(inner),
        };
        assert!(wrapped.is_unsafe());
        assert!(!FetchError::TooManyRedirects.is_unsafe());
    }

    #[test]
    fn status_extraction_sees_through_wrapping() {
        let wrapped = FetchError::Unreachable {
            url: "https://example.com/".into(),
            attempts: 4,
            source: Box::new(FetchError::HttpStatus(503)),
        };
        assert_eq!(wrapped.status(), Some(503));
        assert_eq!(FetchError::TooManyRedirects.status(), None);
    }

    #[test]
    fn display_strings_are_storable() {
        // Unfetchable feeds persist the error string for later re-scans.
        let err = FetchError::DeclaredTooLarge {
            declared: 200_000_000,
            limit: 104_857_600,
        };
        assert!(err.to_string().contains("200000000"));
    }
}
