use std::fmt;

use crate::{
    gemini::{DEFAULT_GENERATION_ENDPOINT, DEFAULT_MODEL},
    BotClient, CampusAssistant, CompletionClient, RelayError, ResilientCaller, Result,
};

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Deployment settings, read once at startup and passed down explicitly.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Generation API key. Completion is disabled when absent.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    /// Bot backend base URL. Bot routing is disabled when absent.
    pub bot_url: Option<String>,
    /// Webhook attempts per message; 1 disables retries.
    pub bot_retry_attempts: u32,
    pub bot_retry_backoff_ms: u64,
    /// Listen address of the relay server.
    pub bind: String,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field(
                "gemini_api_key",
                &self.gemini_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("gemini_model", &self.gemini_model)
            .field("gemini_endpoint", &self.gemini_endpoint)
            .field("bot_url", &self.bot_url)
            .field("bot_retry_attempts", &self.bot_retry_attempts)
            .field("bot_retry_backoff_ms", &self.bot_retry_backoff_ms)
            .field("bind", &self.bind)
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: DEFAULT_MODEL.to_owned(),
            gemini_endpoint: DEFAULT_GENERATION_ENDPOINT.to_owned(),
            bot_url: None,
            bot_retry_attempts: 1,
            bot_retry_backoff_ms: 1_000,
            bind: DEFAULT_BIND.to_owned(),
        }
    }
}

impl RelayConfig {
    /// Reads the process environment.
    ///
    /// Reads:
    /// - `GEMINI_API_KEY` (or `GOOGLE_GENERATIVEAI_API_KEY`)
    /// - `GEMINI_MODEL`, `GEMINI_ENDPOINT`
    /// - `RASA_SERVER_URL` (or `RASA_API_URL`)
    /// - `RASA_RETRY_ATTEMPTS`, `RASA_RETRY_BACKOFF_MS`
    /// - `RELAY_BIND`, or `PORT` to listen on `0.0.0.0:<PORT>`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let bot_retry_attempts = match get("RASA_RETRY_ATTEMPTS") {
            Some(raw) => parse_number::<u32>("RASA_RETRY_ATTEMPTS", &raw)?,
            None => defaults.bot_retry_attempts,
        };
        if bot_retry_attempts == 0 {
            return Err(RelayError::Config(
                "RASA_RETRY_ATTEMPTS must be at least 1".to_owned(),
            ));
        }
        let bot_retry_backoff_ms = match get("RASA_RETRY_BACKOFF_MS") {
            Some(raw) => parse_number::<u64>("RASA_RETRY_BACKOFF_MS", &raw)?,
            None => defaults.bot_retry_backoff_ms,
        };

        let bind = match (get("RELAY_BIND"), get("PORT")) {
            (Some(bind), _) => bind,
            (None, Some(port)) => {
                let port = parse_number::<u16>("PORT", &port)?;
                format!("0.0.0.0:{port}")
            }
            (None, None) => defaults.bind,
        };

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_GENERATIVEAI_API_KEY")),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_endpoint: get("GEMINI_ENDPOINT").unwrap_or(defaults.gemini_endpoint),
            bot_url: get("RASA_SERVER_URL").or_else(|| get("RASA_API_URL")),
            bot_retry_attempts,
            bot_retry_backoff_ms,
            bind,
        })
    }

    /// Completion client, if an API key is configured.
    pub fn completion_client(&self, caller: &ResilientCaller) -> Option<CompletionClient> {
        self.gemini_api_key.as_ref().map(|key| {
            CompletionClient::new(key.as_str())
                .with_endpoint(self.gemini_endpoint.as_str())
                .with_model(self.gemini_model.as_str())
                .with_caller(caller.clone())
        })
    }

    /// Bot client, if a bot URL is configured. An unparsable URL is an error.
    pub fn bot_client(&self, caller: &ResilientCaller) -> Result<Option<BotClient>> {
        let Some(url) = self.bot_url.as_deref() else {
            return Ok(None);
        };
        let mut bot = BotClient::new(url)?.with_caller(caller.clone());
        if self.bot_retry_attempts > 1 {
            bot = bot.with_retries(self.bot_retry_attempts, self.bot_retry_backoff_ms)?;
        }
        Ok(Some(bot))
    }

    /// Wires both backends into an assistant sharing one HTTP client.
    pub fn assistant(&self) -> Result<CampusAssistant> {
        let caller = ResilientCaller::new();
        Ok(CampusAssistant::new(
            self.bot_client(&caller)?,
            self.completion_client(&caller),
        ))
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|err| RelayError::Config(format!("{key} must be a number, got '{raw}': {err}")))
}
