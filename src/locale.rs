use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FailureReason;

/// UI language tag. Anything other than `en` falls back to Chinese, which is
/// the UI default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
}

impl Language {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
        }
    }

    /// Lenient parse used for request bodies.
    pub fn from_tag(tag: &str) -> Self {
        tag.parse().unwrap_or_default()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-tw" | "zh-hant" => Ok(Self::Zh),
            "en" | "en-us" | "en-gb" => Ok(Self::En),
            other => Err(format!("unsupported language tag '{other}'")),
        }
    }
}

/// User-facing text for a failed call. Always non-empty.
pub fn failure_message(reason: &FailureReason, language: Language) -> String {
    let text = match (reason, language) {
        (FailureReason::Timeout, Language::En) => "Request timeout. Please try again.",
        (FailureReason::Timeout, Language::Zh) => "請求超時，請稍後再試。",
        (FailureReason::NetworkError, Language::En) => {
            "Cannot reach the assistant service. Please check your connection and try again."
        }
        (FailureReason::NetworkError, Language::Zh) => "無法連接到助手服務，請檢查網路連線後再試。",
        (FailureReason::RateLimited { .. }, Language::En) => {
            "API quota exceeded. Please try again later."
        }
        (FailureReason::RateLimited { .. }, Language::Zh) => "API 配額已達上限，請稍後再試。",
        (FailureReason::AuthError { .. }, Language::En) => {
            "Invalid API key. Please check the GEMINI_API_KEY environment variable."
        }
        (FailureReason::AuthError { .. }, Language::Zh) => {
            "API key 無效，請檢查 GEMINI_API_KEY 環境變數。"
        }
        (FailureReason::ServerError { .. }, Language::En) => {
            "The assistant service is temporarily unavailable. Please try again later."
        }
        (FailureReason::ServerError { .. }, Language::Zh) => "助手服務暫時無法使用，請稍後再試。",
        (FailureReason::ClientError { .. }, Language::En) => {
            "The request could not be processed. Please rephrase your question."
        }
        (FailureReason::ClientError { .. }, Language::Zh) => "無法處理此請求，請重新表述您的問題。",
        (FailureReason::InvalidResponseShape, Language::En) => {
            "The assistant returned an unexpected response. Please try again."
        }
        (FailureReason::InvalidResponseShape, Language::Zh) => "助手返回了無效的回應格式，請再試一次。",
        (FailureReason::UpstreamEmptyOrUnsafeResponse, Language::En) => {
            "Response blocked by safety filter or empty. Please rephrase your question."
        }
        (FailureReason::UpstreamEmptyOrUnsafeResponse, Language::Zh) => {
            "回應被安全過濾器阻止或為空，請重新表述您的問題。"
        }
        (FailureReason::Cancelled, Language::En) => "The request was cancelled.",
        (FailureReason::Cancelled, Language::Zh) => "請求已取消。",
    };
    text.to_owned()
}

/// Shown when no backend is configured at all.
pub fn not_configured_message(language: Language) -> String {
    match language {
        Language::En => "The assistant is not configured yet. Please use the map to find facilities.",
        Language::Zh => "助手服務尚未設定，請先使用地圖查找設施。",
    }
    .to_owned()
}

/// Shown when the user submits a blank message.
pub fn empty_input_message(language: Language) -> String {
    match language {
        Language::En => "Please enter a question.",
        Language::Zh => "請輸入您的問題。",
    }
    .to_owned()
}

/// Shown when a configured backend cannot even build its request.
pub fn misconfigured_message(language: Language) -> String {
    match language {
        Language::En => {
            "The assistant service is misconfigured. Please contact the administrator."
        }
        Language::Zh => "助手服務設定有誤，請聯繫管理員。",
    }
    .to_owned()
}

/// Label lines used when assembling a completion prompt.
pub(crate) struct PromptLabels {
    pub context: &'static str,
    pub question: &'static str,
    pub instruction: &'static str,
}

pub(crate) fn prompt_labels(language: Language) -> PromptLabels {
    match language {
        Language::En => PromptLabels {
            context: "Conversation context:",
            question: "User question:",
            instruction: "Please provide a helpful response:",
        },
        Language::Zh => PromptLabels {
            context: "對話上下文：",
            question: "用戶問題：",
            instruction: "請提供有用的回應：",
        },
    }
}
