//! HTTP relay in front of the two backends.
//!
//! Routes:
//! - `POST /api/gemini/chat`: completion proxy
//! - `POST /api/rasa/webhook`, `POST /rasa/webhooks/rest/webhook`: bot webhook proxy
//! - `GET /api/rasa/status`: bot status probe
//! - `POST /api/chat`: [`CampusAssistant::reply`]
//! - `GET /health`: liveness
//!
//! Bodies that are not JSON get the same error shape as a missing field.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    assistant::DEFAULT_SENDER, failure_message, BotClient, CallOutcome, CampusAssistant,
    ChatReply, ChatTurn, CompletionClient, FailureReason, Language, RelayConfig, ResilientCaller,
    Result,
};

/// Shared, read-only handler state.
#[derive(Clone, Debug)]
pub struct AppState {
    completion: Option<CompletionClient>,
    bot: Option<BotClient>,
    assistant: CampusAssistant,
}

impl AppState {
    pub fn new(bot: Option<BotClient>, completion: Option<CompletionClient>) -> Self {
        Self {
            assistant: CampusAssistant::new(bot.clone(), completion.clone()),
            completion,
            bot,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let caller = ResilientCaller::new();
        Ok(Self::new(
            config.bot_client(&caller)?,
            config.completion_client(&caller),
        ))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/gemini/chat", post(gemini_chat))
        .route("/api/rasa/webhook", post(rasa_webhook))
        .route("/rasa/webhooks/rest/webhook", post(rasa_webhook))
        .route("/api/rasa/status", get(rasa_status))
        .route("/api/chat", post(assistant_chat))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `config.bind` and serves until Ctrl-C.
pub async fn serve(config: &RelayConfig) -> Result<()> {
    let state = AppState::from_config(config)?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        bind = %config.bind,
        bot = state.bot.is_some(),
        completion = state.completion.is_some(),
        "starting campus relay"
    );

    let listener = tokio::net::TcpListener::bind(config.bind.as_str()).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

/// Cancels the upstream call when the client disconnects and axum drops
/// the handler future.
fn request_scope() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (cancel, guard)
}

/// `{error, message}` body for a request the relay cannot use.
fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "請求格式錯誤",
            "message": message
        })),
    )
        .into_response()
}

fn text_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
}

fn language_field(body: &Value) -> Language {
    body.get("language")
        .and_then(Value::as_str)
        .map(Language::from_tag)
        .unwrap_or_default()
}

fn context_field(body: &Value) -> Vec<String> {
    body.get("conversation_context")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

fn completion_status(reason: &FailureReason) -> StatusCode {
    match reason {
        FailureReason::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        FailureReason::AuthError { .. } => StatusCode::UNAUTHORIZED,
        FailureReason::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }))
}

async fn gemini_chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let Some(client) = state.completion.as_ref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Gemini API 未配置",
                "message": "請設置 GEMINI_API_KEY 環境變數"
            })),
        )
            .into_response();
    };

    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(message) = text_field(&body, "message") else {
        return bad_request("缺少必要欄位 \"message\"".to_owned());
    };

    let language = language_field(&body);
    let context = context_field(&body);
    let (cancel, _guard) = request_scope();

    match client.ask(message, &context, language, &cancel).await {
        Ok(CallOutcome::Success { value, .. }) => (
            StatusCode::OK,
            Json(json!({
                "text": value,
                "language": language,
                "source": "gemini"
            })),
        )
            .into_response(),
        Ok(CallOutcome::Failure {
            reason,
            attempts_used,
            ..
        }) => (
            completion_status(&reason),
            Json(json!({
                "error": reason.to_string(),
                "message": failure_message(&reason, language),
                "attempts": attempts_used
            })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "服務器錯誤",
                "message": err.to_string()
            })),
        )
            .into_response(),
    }
}

fn bot_messages(status: StatusCode, text: String, recipient: &str) -> Response {
    (
        status,
        Json(json!([{ "text": text, "recipient_id": recipient }])),
    )
        .into_response()
}

async fn rasa_webhook(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return bot_messages(
                StatusCode::BAD_REQUEST,
                format!("❌ 請求格式錯誤：{}", rejection.body_text()),
                DEFAULT_SENDER,
            )
        }
    };
    let sender = body
        .get("sender")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_SENDER)
        .to_owned();

    let Some(bot) = state.bot.as_ref() else {
        return bot_messages(
            StatusCode::OK,
            "⚠️ Rasa 服務器未配置。請設置 RASA_SERVER_URL 環境變量".to_owned(),
            DEFAULT_SENDER,
        );
    };

    if !body.is_object() || (text_field(&body, "message").is_none() && text_field(&body, "text").is_none()) {
        return bot_messages(
            StatusCode::BAD_REQUEST,
            "❌ 請求格式錯誤：缺少必要欄位 \"message\" 或 \"text\"".to_owned(),
            &sender,
        );
    }

    let (cancel, _guard) = request_scope();
    match bot.forward(body, &cancel).await {
        Ok(CallOutcome::Success { value, .. }) => (StatusCode::OK, Json(value)).into_response(),
        Ok(CallOutcome::Failure {
            last_raw_message, ..
        }) => bot_messages(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("❌ 無法連接到 Rasa 服務器: {last_raw_message}"),
            &sender,
        ),
        Err(err) => bot_messages(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("❌ 服務器錯誤: {err}"),
            &sender,
        ),
    }
}

async fn rasa_status(State(state): State<AppState>) -> Response {
    let Some(bot) = state.bot.as_ref() else {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "no_server",
                "message": "Rasa 服務器未配置。請設置環境變量 RASA_SERVER_URL"
            })),
        )
            .into_response();
    };

    let (cancel, _guard) = request_scope();
    match bot.status(&cancel).await {
        Ok(CallOutcome::Success { value, .. }) => (StatusCode::OK, Json(value)).into_response(),
        Ok(CallOutcome::Failure {
            reason,
            last_raw_message,
            ..
        }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "message": format!("無法連接到 Rasa 服務器: {last_raw_message}"),
                "rasa_url": bot.base_url(),
                "error_type": reason.to_string()
            })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "error": err.to_string()
            })),
        )
            .into_response(),
    }
}

async fn assistant_chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let language = language_field(&body);
    let Some(message) = text_field(&body, "message") else {
        return bad_request("缺少必要欄位 \"message\"".to_owned());
    };

    let mut turn = ChatTurn::new(message, language).with_context(context_field(&body));
    if let Some(sender) = text_field(&body, "sender") {
        turn = turn.with_sender(sender);
    }

    let (cancel, _guard) = request_scope();
    let ChatReply { text, origin } = state.assistant.reply(turn, &cancel).await;
    (
        StatusCode::OK,
        Json(json!({
            "text": text,
            "origin": origin.label(),
            "language": language
        })),
    )
        .into_response()
}
