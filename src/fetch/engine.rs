use std::io;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, IF_MODIFIED_SINCE, IF_NONE_MATCH, USER_AGENT};
use reqwest::StatusCode;
use url::Url;

use crate::client::Fetcher;
use crate::urls::{prepare_url, PreparePolicy};

use super::error::{io_error_kind, redirect_rejection, FetchError};
use super::options::FetchOptions;
use super::response::FetchedResponse;
use super::stream::{collect_body, BodyError};

enum AttemptOutcome {
    Done(FetchedResponse),
    /// Retryable status observed; the response was dropped without reading a
    /// single body byte.
    RetryStatus(StatusCode),
}

impl Fetcher {
    /// Fetches a URL with safety validation, retry with jittered backoff,
    /// per-hop redirect validation, and streamed size/content-type guards.
    ///
    /// # Errors
    ///
    /// - [`FetchError::UnsafeUrl`] - canonicalization or the SSRF gate
    ///   rejected the URL (pre-flight, before any socket) or a redirect hop
    /// - [`FetchError::Unreachable`] - retry budget spent; wraps the last
    ///   cause (`HttpStatus` or a network error)
    /// - [`FetchError::BlockedContentType`] - content type in the blocked set
    /// - [`FetchError::DeclaredTooLarge`] / [`FetchError::StreamTooLarge`] -
    ///   size ceiling crossed before / during the body download
    /// - [`FetchError::Aborted`] - the caller's `should_continue` declined
    ///
    /// Responses with non-retryable statuses (404 and friends) are returned
    /// as values, body included; only retryable statuses become errors once
    /// the budget runs out.
    pub async fn fetch_url(
        &self,
        raw_url: &str,
        options: &FetchOptions,
    ) -> Result<FetchedResponse, FetchError> {
        let policy = if self.config.allow_loopback {
            PreparePolicy::ValidateAllowLoopback
        } else {
            PreparePolicy::Validate
        };
        let url = prepare_url(raw_url, None, policy).ok_or_else(|| FetchError::UnsafeUrl {
            url: raw_url.to_owned(),
        })?;

        let tries = options.retry.limit.saturating_add(1);
        let mut ua_rotation = 0usize;
        let mut force_ipv4 = false;

        let mut attempt = 0u32;
        loop {
            let client = if force_ipv4 {
                &self.ipv4_client
            } else {
                &self.client
            };

            let failure = match self.attempt(client, &url, options, ua_rotation).await {
                Ok(AttemptOutcome::Done(response)) => return Ok(response),
                Ok(AttemptOutcome::RetryStatus(status)) => {
                    if status == StatusCode::FORBIDDEN {
                        // Bot filters keyed on User-Agent often clear after a
                        // rotation; try the next identity.
                        ua_rotation += 1;
                    }
                    FetchError::HttpStatus(status.as_u16())
                }
                Err(err) => {
                    if let FetchError::Network(net) = &err {
                        if io_error_kind(net) == Some(io::ErrorKind::NetworkUnreachable) {
                            force_ipv4 = true;
                        }
                    }
                    if !options.retry.is_retryable_error(&err) {
                        return Err(err);
                    }
                    err
                }
            };

            attempt += 1;
            if attempt >= tries {
                return Err(FetchError::Unreachable {
                    url: url.to_string(),
                    attempts: tries,
                    source: Box::new(failure),
                });
            }

            let delay = options.retry.backoff_delay(attempt - 1);
            tracing::warn!(
                url = %url,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "transient fetch failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        client: &reqwest::Client,
        url: &Url,
        options: &FetchOptions,
        ua_rotation: usize,
    ) -> Result<AttemptOutcome, FetchError> {
        // Socket ceiling: the permit spans the whole attempt, headers through
        // body. Backoff sleeps happen outside it.
        let _permit = self
            .gate
            .acquire()
            .await
            .expect("fetcher semaphore is never closed");

        let user_agent = &self.config.user_agents[ua_rotation % self.config.user_agents.len()];
        let mut request = client
            .get(url.clone())
            .headers(options.headers.clone())
            .header(USER_AGENT, user_agent);
        if let Some(etag) = &options.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &options.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        // Headers first; everything below is an early rejection point that
        // never costs a body download.
        let response = request.send().await.map_err(|err| {
            redirect_rejection(&err).unwrap_or(FetchError::Network(err))
        })?;

        let status = response.status();
        if options.retry.is_retryable_status(status) {
            tracing::debug!(url = %url, status = status.as_u16(), "retryable status, dropping response unread");
            return Ok(AttemptOutcome::RetryStatus(status));
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if options.is_blocked_content_type(content_type) {
                return Err(FetchError::BlockedContentType {
                    content_type: content_type.to_owned(),
                });
            }
        }

        // Declared size is the wire (possibly compressed) size while the
        // streamed count below is post-decompression; the two checks stay
        // independent on purpose.
        if let Some(declared) = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            if declared > options.max_content_size {
                return Err(FetchError::DeclaredTooLarge {
                    declared,
                    limit: options.max_content_size,
                });
            }
        }

        let final_url = response.url().clone();
        if let Some(should_continue) = &options.should_continue {
            if !should_continue(&final_url, status, response.headers()) {
                return Err(FetchError::Aborted {
                    url: final_url.to_string(),
                });
            }
        }

        let headers = response.headers().clone();
        let body = collect_body(response.bytes_stream(), options.max_content_size)
            .await
            .map_err(|err| match err {
                BodyError::TooLarge { read, limit } => FetchError::StreamTooLarge { read, limit },
                BodyError::Transport(err) => FetchError::Network(err),
            })?;

        Ok(AttemptOutcome::Done(FetchedResponse::new(
            final_url,
            status,
            headers,
            body.text,
            body.sha256_hex,
            body.bytes,
        )))
    }
}
