use tokio_util::sync::CancellationToken;

use crate::{
    locale::{
        empty_input_message, failure_message, misconfigured_message, not_configured_message,
        Language,
    },
    rasa::reply_text,
    BotClient, CallOutcome, CompletionClient, FailureReason,
};

/// Sender id used toward the bot backend when the UI supplies none.
pub const DEFAULT_SENDER: &str = "default";

/// One user message from the chat UI.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatTurn {
    pub user_text: String,
    pub language: Language,
    /// Prior utterances, oldest first. Only the last five reach the model.
    pub conversation_context: Vec<String>,
    pub sender: Option<String>,
}

impl ChatTurn {
    pub fn new(user_text: impl Into<String>, language: Language) -> Self {
        Self {
            user_text: user_text.into(),
            language,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.conversation_context = context;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

/// Which path produced the reply text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyOrigin {
    Bot,
    Completion,
    /// Every configured backend failed; the text is a localized error.
    Failure(FailureReason),
    /// A configured backend could not build its request.
    Misconfigured,
    /// The user text was blank; nothing was sent upstream.
    EmptyInput,
    /// No backend is configured.
    Unconfigured,
}

impl ReplyOrigin {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Completion => "completion",
            Self::Failure(_) => "failure",
            Self::Misconfigured => "misconfigured",
            Self::EmptyInput => "empty_input",
            Self::Unconfigured => "unconfigured",
        }
    }
}

/// Text to render on the assistant side of the chat. Never empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub origin: ReplyOrigin,
}

/// Routes a chat turn to the bot backend first and falls back to the
/// completion backend.
#[derive(Clone, Debug, Default)]
pub struct CampusAssistant {
    bot: Option<BotClient>,
    completion: Option<CompletionClient>,
}

impl CampusAssistant {
    pub fn new(bot: Option<BotClient>, completion: Option<CompletionClient>) -> Self {
        Self { bot, completion }
    }

    pub fn bot(&self) -> Option<&BotClient> {
        self.bot.as_ref()
    }

    pub fn completion(&self) -> Option<&CompletionClient> {
        self.completion.as_ref()
    }

    /// Answers one turn. Always returns displayable text: a bot or model
    /// reply, or a localized message explaining the last failure. Blank
    /// user text never reaches a backend.
    pub async fn reply(&self, turn: ChatTurn, cancel: &CancellationToken) -> ChatReply {
        let language = turn.language;
        let user_text = turn.user_text.trim();
        if user_text.is_empty() {
            return ChatReply {
                text: empty_input_message(language),
                origin: ReplyOrigin::EmptyInput,
            };
        }

        let mut last_failure: Option<FailureReason> = None;
        let mut misconfigured = false;

        if let Some(bot) = &self.bot {
            let sender = turn.sender.as_deref().unwrap_or(DEFAULT_SENDER);
            match bot.send_message(sender, user_text, cancel).await {
                Ok(CallOutcome::Success { value, .. }) => match reply_text(&value) {
                    Some(text) => {
                        return ChatReply {
                            text,
                            origin: ReplyOrigin::Bot,
                        }
                    }
                    None => last_failure = Some(FailureReason::UpstreamEmptyOrUnsafeResponse),
                },
                Ok(CallOutcome::Failure { reason, .. }) => last_failure = Some(reason),
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %err, "bot request could not be built");
                    #[cfg(not(feature = "tracing"))]
                    let _ = err;
                    misconfigured = true;
                }
            }
        }

        if last_failure == Some(FailureReason::Cancelled) {
            return failure_reply(FailureReason::Cancelled, language);
        }

        if let Some(completion) = &self.completion {
            match completion
                .ask(user_text, &turn.conversation_context, language, cancel)
                .await
            {
                Ok(CallOutcome::Success { value, .. }) => {
                    return ChatReply {
                        text: value,
                        origin: ReplyOrigin::Completion,
                    }
                }
                Ok(CallOutcome::Failure { reason, .. }) => last_failure = Some(reason),
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %err, "completion request could not be built");
                    #[cfg(not(feature = "tracing"))]
                    let _ = err;
                    misconfigured = true;
                }
            }
        }

        match last_failure {
            Some(reason) => failure_reply(reason, language),
            None if misconfigured => ChatReply {
                text: misconfigured_message(language),
                origin: ReplyOrigin::Misconfigured,
            },
            None => ChatReply {
                text: not_configured_message(language),
                origin: ReplyOrigin::Unconfigured,
            },
        }
    }
}

fn failure_reply(reason: FailureReason, language: Language) -> ChatReply {
    ChatReply {
        text: failure_message(&reason, language),
        origin: ReplyOrigin::Failure(reason),
    }
}
