/// Error type returned by this crate.
///
/// Upstream failures are not errors: they come back as
/// [`CallOutcome::Failure`](crate::CallOutcome::Failure). This enum only
/// covers caller bugs and broken configuration.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed [`CallRequest`](crate::CallRequest) (bad URL, zero timeout).
    #[error("invalid call request: {0}")]
    InvalidRequest(String),
    /// Malformed [`RetryPolicy`](crate::RetryPolicy).
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
    /// Missing or unparsable configuration value.
    #[error("configuration error: {0}")]
    Config(String),
    /// Listener or socket failure in the relay server.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
