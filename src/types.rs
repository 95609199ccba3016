use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;

use crate::{RelayError, Result};

/// HTTP method of an upstream call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// One upstream HTTP request, validated at construction and immutable after.
#[derive(Clone, Debug)]
pub struct CallRequest {
    endpoint: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
    timeout: Duration,
}

impl CallRequest {
    /// Builds a request against an absolute `http`/`https` URL.
    ///
    /// Fails with [`RelayError::InvalidRequest`] on a relative or unparsable
    /// URL, an unsupported scheme, or a zero timeout.
    pub fn new(method: Method, endpoint: impl AsRef<str>, timeout_ms: u64) -> Result<Self> {
        let raw = endpoint.as_ref();
        let endpoint = Url::parse(raw)
            .map_err(|err| RelayError::InvalidRequest(format!("invalid endpoint '{raw}': {err}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(RelayError::InvalidRequest(format!(
                "unsupported scheme '{}' in endpoint",
                endpoint.scheme()
            )));
        }
        if timeout_ms == 0 {
            return Err(RelayError::InvalidRequest(
                "timeout must be greater than zero".to_owned(),
            ));
        }
        Ok(Self {
            endpoint,
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn get(endpoint: impl AsRef<str>, timeout_ms: u64) -> Result<Self> {
        Self::new(Method::Get, endpoint, timeout_ms)
    }

    pub fn post(endpoint: impl AsRef<str>, timeout_ms: u64) -> Result<Self> {
        Self::new(Method::Post, endpoint, timeout_ms)
    }

    /// Adds a header. Invalid names or values are a caller bug.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| RelayError::InvalidRequest(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| RelayError::InvalidRequest(format!("invalid header value: {err}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Attaches a JSON body.
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Why an upstream call did not produce a usable result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// No complete response within the request deadline.
    Timeout,
    /// Transport failure before any HTTP status arrived.
    NetworkError,
    /// HTTP 429. `retry_after` comes from a numeric `Retry-After` header.
    RateLimited { retry_after: Option<Duration> },
    /// HTTP 401 or 403. Never retried.
    AuthError { status: u16 },
    /// HTTP 5xx.
    ServerError { status: u16 },
    /// Any other HTTP 4xx.
    ClientError { status: u16 },
    /// 2xx whose body is not JSON or lacks the expected fields.
    InvalidResponseShape,
    /// 2xx whose content is blank or was blocked by a safety filter.
    UpstreamEmptyOrUnsafeResponse,
    /// The caller tripped the cancellation token.
    Cancelled,
}

impl FailureReason {
    /// Maps an HTTP error status (>= 400) to its classification.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::AuthError { status },
            429 => Self::RateLimited { retry_after },
            500.. => Self::ServerError { status },
            _ => Self::ClientError { status },
        }
    }

    /// Terminal regardless of the policy's classifier.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AuthError { .. }
                | Self::InvalidResponseShape
                | Self::UpstreamEmptyOrUnsafeResponse
                | Self::Cancelled
        )
    }

    /// The HTTP status behind this failure, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthError { status } | Self::ServerError { status } | Self::ClientError { status } => {
                Some(*status)
            }
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::NetworkError => f.write_str("network error"),
            Self::RateLimited { .. } => f.write_str("rate limited"),
            Self::AuthError { status } => write!(f, "auth error ({status})"),
            Self::ServerError { status } => write!(f, "server error ({status})"),
            Self::ClientError { status } => write!(f, "client error ({status})"),
            Self::InvalidResponseShape => f.write_str("invalid response shape"),
            Self::UpstreamEmptyOrUnsafeResponse => f.write_str("empty or unsafe response"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Normalized result of one logical upstream call.
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome<T = String> {
    Success {
        value: T,
        attempts_used: u32,
    },
    Failure {
        reason: FailureReason,
        attempts_used: u32,
        last_raw_message: String,
    },
}

impl<T> CallOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn attempts_used(&self) -> u32 {
        match self {
            Self::Success { attempts_used, .. } | Self::Failure { attempts_used, .. } => *attempts_used,
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason, .. } => Some(reason),
        }
    }

    /// Converts the success value, keeping attempt accounting intact.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U> {
        match self {
            Self::Success { value, attempts_used } => CallOutcome::Success {
                value: f(value),
                attempts_used,
            },
            Self::Failure {
                reason,
                attempts_used,
                last_raw_message,
            } => CallOutcome::Failure {
                reason,
                attempts_used,
                last_raw_message,
            },
        }
    }

    pub fn into_result(self) -> std::result::Result<T, (FailureReason, String)> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Failure {
                reason,
                last_raw_message,
                ..
            } => Err((reason, last_raw_message)),
        }
    }
}
