use std::fmt;
use std::time::Duration;

use reqwest::{header, StatusCode};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{CallOutcome, CallRequest, FailureReason, ResponseValidator, RetryPolicy};

/// Upstream error bodies are cut to this many characters in failure messages.
const RAW_MESSAGE_LIMIT: usize = 200;

const REDACTED: &str = "[REDACTED]";

#[derive(Clone, Default)]
/// Executes upstream calls under a [`RetryPolicy`].
///
/// Holds no per-call state; one instance can serve any number of
/// concurrent calls.
pub struct ResilientCaller {
    http: reqwest::Client,
    secrets: Vec<String>,
}

impl fmt::Debug for ResilientCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientCaller")
            .field("secrets", &format_args!("<{} redacted>", self.secrets.len()))
            .finish()
    }
}

struct AttemptFailure {
    reason: FailureReason,
    message: String,
}

impl AttemptFailure {
    fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl ResilientCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuses an existing `reqwest` client and its connection pool.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            secrets: Vec::new(),
        }
    }

    /// Registers a value that must never appear in failure messages,
    /// typically an API key carried in the query string.
    pub fn redact(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.trim().is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Runs one logical call: up to `policy.max_attempts()` sequential
    /// attempts, each bounded by `request.timeout()`.
    ///
    /// Never fails: every upstream problem becomes [`CallOutcome::Failure`].
    /// Tripping `cancel` aborts the in-flight attempt or backoff wait and
    /// yields [`FailureReason::Cancelled`].
    pub async fn call<V>(
        &self,
        request: &CallRequest,
        policy: &RetryPolicy,
        validator: &V,
        cancel: &CancellationToken,
    ) -> CallOutcome<V::Output>
    where
        V: ResponseValidator,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return self.failure(
                    request,
                    FailureReason::Cancelled,
                    attempt,
                    "call cancelled before attempt".to_owned(),
                );
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AttemptFailure::new(
                    FailureReason::Cancelled,
                    "call cancelled while awaiting upstream",
                )),
                result = self.attempt(request, validator) => result,
            };
            let attempts_used = attempt + 1;

            let failure = match result {
                Ok(value) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        attempt = attempts_used,
                        endpoint = %loggable_endpoint(request.endpoint()),
                        outcome = "success",
                        "upstream call succeeded"
                    );
                    return CallOutcome::Success {
                        value,
                        attempts_used,
                    };
                }
                Err(failure) => failure,
            };

            if !policy.should_retry(&failure.reason, attempt) {
                return self.failure(request, failure.reason, attempts_used, failure.message);
            }

            let delay = policy.backoff_delay(attempt);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt = attempts_used,
                endpoint = %loggable_endpoint(request.endpoint()),
                outcome = %failure.reason,
                delay_ms = delay.as_millis() as u64,
                "retrying upstream call after backoff"
            );

            if cancel.is_cancelled() || !wait_before_retry(delay, cancel).await {
                return self.failure(
                    request,
                    FailureReason::Cancelled,
                    attempts_used,
                    "call cancelled during backoff".to_owned(),
                );
            }
            attempt += 1;
        }
    }

    async fn attempt<V>(
        &self,
        request: &CallRequest,
        validator: &V,
    ) -> Result<V::Output, AttemptFailure>
    where
        V: ResponseValidator,
    {
        let exchange = async {
            let mut builder = self
                .http
                .request(request.method().into(), request.endpoint().clone())
                .headers(request.headers().clone())
                .header(header::ACCEPT, "application/json");
            if let Some(body) = request.body() {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(transport_failure)?;
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.map_err(transport_failure)?;
            Ok::<_, AttemptFailure>((status, retry_after, body))
        };

        let (status, retry_after, body) = match timeout(request.timeout(), exchange).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AttemptFailure::new(
                    FailureReason::Timeout,
                    format!(
                        "no response within {} ms",
                        request.timeout().as_millis()
                    ),
                ))
            }
        };

        if status.as_u16() >= 400 {
            return Err(AttemptFailure::new(
                FailureReason::from_status(status.as_u16(), retry_after),
                upstream_error_message(status, &body),
            ));
        }
        if !status.is_success() {
            return Err(AttemptFailure::new(
                FailureReason::InvalidResponseShape,
                format!("unexpected status {status}"),
            ));
        }

        let json = serde_json::from_str::<serde_json::Value>(&body).map_err(|err| {
            AttemptFailure::new(
                FailureReason::InvalidResponseShape,
                format!("invalid JSON response: {err}"),
            )
        })?;

        validator
            .validate(json)
            .map_err(|rejection| AttemptFailure::new(rejection.reason(), rejection.message()))
    }

    fn failure<T>(
        &self,
        request: &CallRequest,
        reason: FailureReason,
        attempts_used: u32,
        message: String,
    ) -> CallOutcome<T> {
        let last_raw_message = self.scrub(message);

        #[cfg(feature = "tracing")]
        tracing::warn!(
            attempt = attempts_used,
            endpoint = %loggable_endpoint(request.endpoint()),
            outcome = %reason,
            detail = %last_raw_message,
            "upstream call failed"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = request;

        CallOutcome::Failure {
            reason,
            attempts_used,
            last_raw_message,
        }
    }

    fn scrub(&self, message: String) -> String {
        self.secrets
            .iter()
            .fold(message, |message, secret| message.replace(secret.as_str(), REDACTED))
    }
}

/// Sleeps for `delay` unless `cancel` fires first. Returns `false` when cancelled.
async fn wait_before_retry(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

fn transport_failure(err: reqwest::Error) -> AttemptFailure {
    let reason = if err.is_timeout() {
        FailureReason::Timeout
    } else {
        FailureReason::NetworkError
    };
    AttemptFailure::new(reason, err.without_url().to_string())
}

fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Prefers `error.message` from a JSON error envelope, falling back to the
/// leading part of the raw body.
fn upstream_error_message(status: StatusCode, body: &str) -> String {
    let envelope = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|message| message.as_str())
                .map(str::to_owned)
        });
    if let Some(message) = envelope {
        return message;
    }

    let snippet: String = body.trim().chars().take(RAW_MESSAGE_LIMIT).collect();
    if snippet.is_empty() {
        format!("HTTP error {status}")
    } else {
        format!("HTTP error {status} - {snippet}")
    }
}

/// Endpoint without its query string, which may carry credentials.
#[cfg(feature = "tracing")]
fn loggable_endpoint(url: &reqwest::Url) -> reqwest::Url {
    let mut url = url.clone();
    url.set_query(None);
    url
}
