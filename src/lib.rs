//! `campus-relay` connects a campus-facilities chat UI to its two
//! conversational backends: a Rasa bot server and the Gemini generation API.
//!
//! Every upstream call goes through [`ResilientCaller::call`], which applies
//! a per-attempt timeout, classifies failures, retries with exponential
//! backoff and returns a [`CallOutcome`]. The call sites are configurations
//! of it:
//! - [`CompletionClient`]: `generateContent`, 15 s, 3 attempts
//! - [`BotClient`]: REST webhook (30 s) and status probe (5 s)
//!
//! [`CampusAssistant::reply`] is the single entry point for the UI.

mod assistant;
mod caller;
mod config;
mod error;
pub mod gemini;
mod locale;
mod options;
pub mod rasa;
mod types;
pub mod validate;
mod wire;

#[cfg(any(feature = "server", feature = "cli"))]
pub mod logging;
#[cfg(feature = "server")]
pub mod server;

pub use assistant::{CampusAssistant, ChatReply, ChatTurn, ReplyOrigin, DEFAULT_SENDER};
pub use caller::ResilientCaller;
pub use config::RelayConfig;
pub use error::RelayError;
pub use gemini::{CompletionClient, CompletionOptions};
pub use locale::{
    empty_input_message, failure_message, misconfigured_message, not_configured_message, Language,
};
pub use options::{retry_never, retry_transient, retry_transport_only, RetryClassifier, RetryPolicy};
pub use rasa::{BotClient, BotOptions};
pub use types::{CallOutcome, CallRequest, FailureReason, Method};
pub use validate::{Rejection, ResponseValidator};
pub use wire::{BotMessage, GenerationConfig};

pub type Result<T> = std::result::Result<T, RelayError>;
