use reqwest::header::{HeaderMap, ETAG, LAST_MODIFIED};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

/// A finalized fetch result. Immutable once built.
///
/// `content_hash` is a SHA-256 over exactly the bytes taken off the wire.
/// When the origin compresses, those are the decompressed bytes while the
/// declared Content-Length counts compressed ones - a documented gap, not
/// silently reconciled.
///
/// No `FetchedResponse` ever exists for a URL that failed the safety gate,
/// and responses with a retryable status are never materialized at all (their
/// bodies are never downloaded).
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    final_url: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: String,
    content_hash: String,
    content_bytes: u64,
}

impl FetchedResponse {
    pub(crate) fn new(
        final_url: Url,
        status: StatusCode,
        headers: HeaderMap,
        body: String,
        content_hash: String,
        content_bytes: u64,
    ) -> Self {
        Self {
            final_url,
            status,
            headers,
            body,
            content_hash,
            content_bytes,
        }
    }

    /// The URL the response actually came from, after safe redirects.
    pub fn final_url(&self) -> &Url {
        &self.final_url
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Canonical reason phrase for the status, e.g. `"Not Found"`.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Unknown")
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// True for a conditional-GET `304 Not Modified` answer. The body is
    /// empty; [`etag`](Self::etag) and [`last_modified`](Self::last_modified)
    /// carry the possibly-rotated validators so the caller's cache record can
    /// update atomically.
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A response header as text, if present and well-formed.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG).and_then(|v| v.to_str().ok())
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok())
    }

    /// The UTF-8 decoded body.
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Lowercase hex SHA-256 of the streamed body bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn content_bytes(&self) -> u64 {
        self.content_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;

    fn sample(status: StatusCode, body: &str) -> FetchedResponse {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert(ETAG, HeaderValue::from_static("\"v2\""));
        FetchedResponse::new(
            Url::parse("https://example.com/feed.json").unwrap(),
            status,
            headers,
            body.to_owned(),
            "deadbeef".to_owned(),
            body.len() as u64,
        )
    }

    #[test]
    fn accessors() {
        let response = sample(StatusCode::OK, r#"{"version":"https://jsonfeed.org/version/1.1"}"#);
        assert_eq!(response.status_text(), "OK");
        assert!(response.is_success());
        assert!(!response.is_not_modified());
        assert_eq!(response.etag(), Some("\"v2\""));
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(response.header("x-missing"), None);

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(
            value["version"],
            serde_json::Value::from("https://jsonfeed.org/version/1.1")
        );
    }

    #[test]
    fn not_modified_is_distinct() {
        let response = sample(StatusCode::NOT_MODIFIED, "");
        assert!(response.is_not_modified());
        assert!(!response.is_success());
        // Validators survive for atomic cache-record updates.
        assert_eq!(response.etag(), Some("\"v2\""));
    }
}
