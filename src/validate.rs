use crate::FailureReason;

/// Maximum characters of assistant text handed back to the UI.
pub const MAX_REPLY_CHARS: usize = 2_000;

/// Appended to a reply cut at [`MAX_REPLY_CHARS`].
pub const ELLIPSIS: &str = "...";

/// Why a 2xx response body was not usable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Missing fields or the wrong JSON type.
    InvalidShape(String),
    /// Blank content or a safety-filter block.
    EmptyOrUnsafe(String),
}

impl Rejection {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::InvalidShape(_) => FailureReason::InvalidResponseShape,
            Self::EmptyOrUnsafe(_) => FailureReason::UpstreamEmptyOrUnsafeResponse,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidShape(message) | Self::EmptyOrUnsafe(message) => message,
        }
    }
}

/// Turns a decoded 2xx body into the call-site payload.
pub trait ResponseValidator {
    type Output;

    fn validate(&self, body: serde_json::Value) -> Result<Self::Output, Rejection>;
}

impl<F, T> ResponseValidator for F
where
    F: Fn(serde_json::Value) -> Result<T, Rejection>,
{
    type Output = T;

    fn validate(&self, body: serde_json::Value) -> Result<T, Rejection> {
        self(body)
    }
}

/// Accepts any JSON object, as returned by status endpoints.
pub fn json_object(body: serde_json::Value) -> Result<serde_json::Value, Rejection> {
    if body.is_object() {
        Ok(body)
    } else {
        Err(Rejection::InvalidShape(format!(
            "expected JSON object, got {}",
            json_kind(&body)
        )))
    }
}

/// Trims `text` and caps it at `max_chars` characters plus [`ELLIPSIS`].
pub fn truncate_reply(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                length = trimmed.chars().count(),
                max_chars,
                "reply too long, truncating"
            );
            let mut out = String::with_capacity(cut + ELLIPSIS.len());
            out.push_str(&trimmed[..cut]);
            out.push_str(ELLIPSIS);
            out
        }
        None => trimmed.to_owned(),
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
