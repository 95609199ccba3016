use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::{
    options::retry_transport_only,
    validate::{json_kind, json_object, Rejection},
    wire::{BotMessage, WebhookRequest},
    CallOutcome, CallRequest, RelayError, ResilientCaller, Result, RetryPolicy,
};

pub const WEBHOOK_PATH: &str = "/webhooks/rest/webhook";
pub const STATUS_PATH: &str = "/status";

/// Configures bot backend timeouts and webhook retries.
#[derive(Clone, Debug)]
pub struct BotOptions {
    /// Webhook timeout in milliseconds.
    pub webhook_timeout_ms: u64,
    /// Status probe timeout in milliseconds.
    pub status_timeout_ms: u64,
    /// Retry policy for webhook calls. Status probes are never retried.
    pub webhook_policy: RetryPolicy,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            webhook_timeout_ms: 30_000,
            status_timeout_ms: 5_000,
            webhook_policy: RetryPolicy::single_attempt(),
        }
    }
}

#[derive(Clone, Debug)]
/// Client for the bot backend's REST webhook and status endpoints.
pub struct BotClient {
    caller: ResilientCaller,
    base_url: String,
    options: BotOptions,
}

impl BotClient {
    /// Fails with [`RelayError::Config`] when `base_url` is not an absolute
    /// http(s) URL.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let raw = base_url.as_ref().trim();
        let parsed = Url::parse(raw)
            .map_err(|err| RelayError::Config(format!("invalid bot server URL '{raw}': {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RelayError::Config(format!(
                "invalid bot server URL '{raw}': unsupported scheme"
            )));
        }
        Ok(Self {
            caller: ResilientCaller::new(),
            base_url: raw.trim_end_matches('/').to_owned(),
            options: BotOptions::default(),
        })
    }

    pub fn with_options(mut self, options: BotOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_caller(mut self, caller: ResilientCaller) -> Self {
        self.caller = caller;
        self
    }

    /// Enables webhook retries on timeouts and transport errors. HTTP error
    /// statuses from the bot itself are still surfaced on first occurrence.
    pub fn with_retries(mut self, max_attempts: u32, backoff_base_ms: u64) -> Result<Self> {
        self.options.webhook_policy =
            RetryPolicy::new(max_attempts, backoff_base_ms, retry_transport_only)?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn options(&self) -> &BotOptions {
        &self.options
    }

    pub fn webhook_url(&self) -> String {
        format!("{}{WEBHOOK_PATH}", self.base_url)
    }

    pub fn status_url(&self) -> String {
        format!("{}{STATUS_PATH}", self.base_url)
    }

    /// Posts `{sender, message}` and decodes the bot's reply messages.
    pub async fn send_message(
        &self,
        sender: &str,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<CallOutcome<Vec<BotMessage>>> {
        let body = serde_json::to_value(WebhookRequest { sender, message })
            .map_err(|err| RelayError::InvalidRequest(format!("unserializable message: {err}")))?;
        let request = CallRequest::post(self.webhook_url(), self.options.webhook_timeout_ms)?
            .with_json(body);
        Ok(self
            .caller
            .call(&request, &self.options.webhook_policy, &validate_webhook, cancel)
            .await)
    }

    /// Relays an arbitrary webhook payload and returns the bot's JSON as-is.
    pub async fn forward(
        &self,
        payload: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<CallOutcome<serde_json::Value>> {
        let request = CallRequest::post(self.webhook_url(), self.options.webhook_timeout_ms)?
            .with_json(payload);
        Ok(self
            .caller
            .call(&request, &self.options.webhook_policy, &webhook_shape, cancel)
            .await)
    }

    /// Probes `GET /status` once.
    pub async fn status(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CallOutcome<serde_json::Value>> {
        let request = CallRequest::get(self.status_url(), self.options.status_timeout_ms)?;
        Ok(self
            .caller
            .call(&request, &RetryPolicy::single_attempt(), &json_object, cancel)
            .await)
    }
}

/// Accepts a JSON array of messages or a single message object.
pub fn validate_webhook(body: serde_json::Value) -> std::result::Result<Vec<BotMessage>, Rejection> {
    let items = match webhook_shape(body)? {
        serde_json::Value::Array(items) => items,
        object => vec![object],
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<BotMessage>(item).map_err(|err| {
                Rejection::InvalidShape(format!("invalid bot message at index {index}: {err}"))
            })
        })
        .collect()
}

fn webhook_shape(body: serde_json::Value) -> std::result::Result<serde_json::Value, Rejection> {
    if body.is_array() || body.is_object() {
        Ok(body)
    } else {
        Err(Rejection::InvalidShape(format!(
            "bot server returned {} instead of an array or object",
            json_kind(&body)
        )))
    }
}

/// Joins the non-blank `text` fields of bot messages, one per line.
pub fn reply_text(messages: &[BotMessage]) -> Option<String> {
    let lines: Vec<&str> = messages
        .iter()
        .filter_map(|message| message.text.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}
