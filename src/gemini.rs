use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::{
    locale::{prompt_labels, Language},
    validate::{truncate_reply, Rejection, MAX_REPLY_CHARS},
    wire::{Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part},
    CallOutcome, CallRequest, RelayError, ResilientCaller, Result, RetryPolicy,
};

pub const DEFAULT_GENERATION_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

/// Only this many trailing context entries reach the prompt.
pub const MAX_CONTEXT_ENTRIES: usize = 5;
/// User text beyond this many characters is dropped before prompting.
pub const MAX_INPUT_CHARS: usize = 500;

/// Timeout, retry and sampling settings for completion calls.
#[derive(Clone, Debug)]
pub struct CompletionOptions {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    pub policy: RetryPolicy,
    pub generation: GenerationConfig,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            policy: RetryPolicy::completion(),
            generation: GenerationConfig::default(),
        }
    }
}

#[derive(Clone)]
/// Client for the `generateContent` endpoint of the generation API.
pub struct CompletionClient {
    caller: ResilientCaller,
    endpoint_base: String,
    model: String,
    api_key: String,
    system_prompt: Option<String>,
    options: CompletionOptions,
}

impl fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionClient")
            .field("endpoint_base", &self.endpoint_base)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl CompletionClient {
    /// Creates a client against the public endpoint with the default model.
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into().trim().to_owned();
        Self {
            caller: ResilientCaller::new().redact(api_key.clone()),
            endpoint_base: DEFAULT_GENERATION_ENDPOINT.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            api_key,
            system_prompt: None,
            options: CompletionOptions::default(),
        }
    }

    /// Overrides the API base, e.g. a regional endpoint or a test server.
    pub fn with_endpoint(mut self, endpoint_base: impl Into<String>) -> Self {
        self.endpoint_base = endpoint_base.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replaces the built-in system prompt for both languages.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares a caller (and its connection pool). The API key is registered
    /// for redaction on the shared caller.
    pub fn with_caller(mut self, caller: ResilientCaller) -> Self {
        self.caller = caller.redact(self.api_key.clone());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint_base, self.model, self.api_key
        )
    }

    /// Builds the POST request for an already assembled prompt.
    pub fn request(&self, prompt: &str) -> Result<CallRequest> {
        let payload = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_owned()),
                }],
            }],
            generation_config: self.options.generation,
        };
        let body = serde_json::to_value(&payload)
            .map_err(|err| RelayError::InvalidRequest(format!("unserializable prompt: {err}")))?;
        Ok(CallRequest::post(self.generate_url(), self.options.timeout_ms)?.with_json(body))
    }

    /// Sends an assembled prompt and returns the validated reply text.
    pub async fn complete(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<CallOutcome<String>> {
        let request = self.request(prompt)?;
        Ok(self
            .caller
            .call(&request, &self.options.policy, &validate_completion, cancel)
            .await)
    }

    /// Assembles the prompt from a chat turn and completes it.
    pub async fn ask(
        &self,
        user_text: &str,
        conversation_context: &[String],
        language: Language,
        cancel: &CancellationToken,
    ) -> Result<CallOutcome<String>> {
        let system_prompt = self
            .system_prompt
            .as_deref()
            .unwrap_or_else(|| default_system_prompt(language));
        let prompt = build_prompt(
            system_prompt,
            conversation_context,
            &prepare_user_text(user_text),
            language,
        );
        self.complete(&prompt, cancel).await
    }
}

/// Extracts `candidates[0].content.parts[0].text`, rejecting safety blocks
/// and blank text, and caps the result at [`MAX_REPLY_CHARS`].
pub fn validate_completion(body: serde_json::Value) -> std::result::Result<String, Rejection> {
    let response: GenerateContentResponse = serde_json::from_value(body)
        .map_err(|err| Rejection::InvalidShape(format!("invalid generateContent response: {err}")))?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| Rejection::InvalidShape("response has no candidates".to_owned()))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(Rejection::EmptyOrUnsafe(
            "response blocked by safety filter".to_owned(),
        ));
    }

    let text = candidate
        .content
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .ok_or_else(|| Rejection::InvalidShape("candidate has no text part".to_owned()))?;

    if text.trim().is_empty() {
        return Err(Rejection::EmptyOrUnsafe("upstream returned empty text".to_owned()));
    }

    Ok(truncate_reply(&text, MAX_REPLY_CHARS))
}

/// Joins system prompt, the last [`MAX_CONTEXT_ENTRIES`] context lines and
/// the user question into one prompt string.
pub fn build_prompt(
    system_prompt: &str,
    conversation_context: &[String],
    user_text: &str,
    language: Language,
) -> String {
    let labels = prompt_labels(language);
    let mut parts = vec![system_prompt.to_owned()];

    if !conversation_context.is_empty() {
        parts.push(format!("\n\n{}", labels.context));
        let skip = conversation_context.len().saturating_sub(MAX_CONTEXT_ENTRIES);
        parts.extend(
            conversation_context[skip..]
                .iter()
                .map(|entry| format!("- {entry}")),
        );
    }

    parts.push(format!("\n\n{}{user_text}", labels.question));
    parts.push(format!("\n\n{}", labels.instruction));
    parts.join("\n")
}

fn prepare_user_text(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_INPUT_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_owned(),
        None => trimmed.to_owned(),
    }
}

/// Built-in campus assistant persona, used unless
/// [`CompletionClient::with_system_prompt`] replaces it.
pub fn default_system_prompt(language: Language) -> &'static str {
    match language {
        Language::En => EN_SYSTEM_PROMPT,
        Language::Zh => ZH_SYSTEM_PROMPT,
    }
}

const EN_SYSTEM_PROMPT: &str = "\
You are a helpful campus assistant chatbot for National Formosa University (NFU).
You help students and visitors find facilities, answer questions about the campus, and provide friendly, accurate information.

**Campus Information:**
- NFU has 3 campuses: Campus 1 (第一校區), Campus 2 (第二校區), and Campus 3 (第三校區)
- Main buildings include: Zongsan Building (綜三館), and other campus buildings
- Facilities available: restrooms (toilets), water fountains, and trash cans

**Facility Types:**
- Restrooms (toilets): Can be men's (男), women's (女), or unisex/gender-inclusive (性別友善)
- Water fountains (飲水機): Drinking water dispensers
- Trash cans (垃圾桶): Waste bins

**Facility Status:**
- Normal (正常): Working properly
- Under maintenance (維修中): Currently being repaired
- Malfunction (故障): Not working
- Temporarily closed (暫停使用): Temporarily unavailable
- Unusable (無法使用): Cannot be used
- Overflowing (滿出): Trash can is full
- Cleaning (清潔中): Currently being cleaned
- Partially damaged (部分損壞): Some parts not working

**Response Guidelines:**
- Keep responses concise (under 200 words when possible)
- Be friendly and helpful
- If asked about facilities, guide users to use the map or ask specific questions
- If you don't know specific building or facility details, suggest users check the map
- Always respond in the same language as the user's question
- Use emojis sparingly and appropriately";

const ZH_SYSTEM_PROMPT: &str = "\
你是一個友善的校園助手聊天機器人，服務於國立虎尾科技大學。
你幫助學生和訪客查找設施、回答校園相關問題，並提供友善、準確的資訊。

**校園資訊：**
- 虎尾科技大學有三個校區：第一校區、第二校區、第三校區
- 主要建築包括：綜三館等校園建築
- 可用設施：廁所、飲水機、垃圾桶

**設施類型：**
- 廁所：可分為男廁、女廁、性別友善廁所
- 飲水機：提供飲用水的設備
- 垃圾桶：廢棄物收集容器

**設施狀態：**
- 正常：運作正常
- 維修中：正在維修
- 故障：無法使用
- 暫停使用：暫時無法使用
- 無法使用：完全無法使用
- 滿出：垃圾桶已滿
- 清潔中：正在清潔
- 部分損壞：部分功能無法使用

**回應指南：**
- 保持回應簡潔（盡量在 200 字以內）
- 友善且有用
- 如果被問到設施相關問題，引導用戶使用地圖或詢問具體問題
- 如果不確定特定建築或設施的詳細資訊，建議用戶查看地圖
- 始終使用與用戶問題相同的語言回應
- 適度使用表情符號";
