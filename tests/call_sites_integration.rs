mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use campus_relay::{
    empty_input_message, failure_message, retry_transient, BotClient, BotOptions, CallOutcome,
    CampusAssistant, ChatTurn, CompletionClient, CompletionOptions, FailureReason, Language,
    ReplyOrigin, RetryPolicy,
};
use common::{completion_body, spawn_server, MockResponse, TestServer};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn completion_client(server: &TestServer) -> CompletionClient {
    CompletionClient::new("test-key")
        .with_endpoint(server.url("/v1beta"))
        .with_options(CompletionOptions {
            timeout_ms: 1_000,
            policy: RetryPolicy::new(3, 1, retry_transient).expect("valid policy"),
            ..CompletionOptions::default()
        })
}

fn bot_client(server: &TestServer) -> BotClient {
    BotClient::new(&server.base_url).expect("valid bot url")
}

#[tokio::test]
async fn completion_request_follows_generation_contract() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        completion_body("Restrooms are on every floor."),
    )])
    .await;
    let client = completion_client(&server);

    let outcome = client
        .ask(
            "  where are the restrooms?  ",
            &[],
            Language::En,
            &CancellationToken::new(),
        )
        .await
        .expect("valid request");

    assert_eq!(
        outcome,
        CallOutcome::Success {
            value: "Restrooms are on every floor.".to_owned(),
            attempts_used: 1,
        }
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent.method, Method::POST);
    assert_eq!(
        sent.path,
        "/v1beta/models/gemini-2.0-flash-exp:generateContent"
    );
    assert_eq!(sent.query.as_deref(), Some("key=test-key"));

    let body = sent.json();
    let prompt = body["contents"][0]["parts"][0]["text"]
        .as_str()
        .expect("prompt text");
    assert!(prompt.contains("User question:where are the restrooms?"));
    assert_eq!(body["generationConfig"]["temperature"], 0.6);
    assert_eq!(body["generationConfig"]["topP"], 0.85);
    assert_eq!(body["generationConfig"]["topK"], 40);
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 800);
}

#[tokio::test]
async fn completion_prompt_uses_last_five_context_entries() {
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, completion_body("ok"))]).await;
    let client = completion_client(&server);
    let context: Vec<String> = (1..=8).map(|i| format!("entry {i}")).collect();

    client
        .ask("library hours?", &context, Language::Zh, &CancellationToken::new())
        .await
        .expect("valid request");

    let body = server.requests()[0].json();
    let prompt = body["contents"][0]["parts"][0]["text"]
        .as_str()
        .expect("prompt text")
        .to_owned();
    for dropped in 1..=3 {
        assert!(!prompt.contains(&format!("- entry {dropped}\n")));
    }
    for kept in 4..=8 {
        assert!(prompt.contains(&format!("- entry {kept}")));
    }
    assert!(prompt.contains("對話上下文："));
}

#[tokio::test]
async fn bot_send_message_posts_sender_and_message() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!([
            {"recipient_id": "student-7", "text": "第一校區的廁所在圖書館一樓。"},
            {"recipient_id": "student-7", "buttons": [{"title": "地圖", "payload": "/map"}]}
        ]),
    )])
    .await;
    let bot = bot_client(&server);

    let outcome = bot
        .send_message("student-7", "廁所在哪裡", &CancellationToken::new())
        .await
        .expect("valid request");

    let messages = outcome.into_result().expect("bot reply");
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[0].text.as_deref(),
        Some("第一校區的廁所在圖書館一樓。")
    );
    assert_eq!(messages[1].buttons.len(), 1);

    let sent = &server.requests()[0];
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.path, "/webhooks/rest/webhook");
    assert_eq!(
        sent.json(),
        json!({"sender": "student-7", "message": "廁所在哪裡"})
    );
}

#[tokio::test]
async fn bot_forward_returns_payload_untouched() {
    let reply = json!([{"recipient_id": "u", "text": "hi", "custom": {"map": "campus-1"}}]);
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, reply.clone())]).await;
    let bot = bot_client(&server);

    let outcome = bot
        .forward(
            json!({"sender": "u", "text": "hello", "metadata": {"lang": "en"}}),
            &CancellationToken::new(),
        )
        .await
        .expect("valid request");

    assert_eq!(outcome.into_result().expect("bot reply"), reply);
    assert_eq!(
        server.requests()[0].json()["metadata"]["lang"],
        json!("en")
    );
}

#[tokio::test]
async fn bot_status_is_a_single_get() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::SERVICE_UNAVAILABLE, json!({})),
        MockResponse::json(StatusCode::OK, json!({"version": "3.6.0"})),
    ])
    .await;
    let bot = bot_client(&server).with_retries(3, 1).expect("valid policy");

    let outcome = bot.status(&CancellationToken::new()).await.expect("valid request");

    assert_eq!(
        outcome.failure_reason(),
        Some(&FailureReason::ServerError { status: 503 })
    );
    assert_eq!(outcome.attempts_used(), 1);
    let sent = &server.requests()[0];
    assert_eq!(sent.method, Method::GET);
    assert_eq!(sent.path, "/status");

    let healthy = bot.status(&CancellationToken::new()).await.expect("valid request");
    assert_eq!(
        healthy.into_result().expect("status body"),
        json!({"version": "3.6.0"})
    );
}

#[tokio::test]
async fn bot_http_errors_are_not_retried() {
    let server = spawn_server(vec![
        MockResponse::raw(StatusCode::INTERNAL_SERVER_ERROR, "rasa crashed"),
        MockResponse::json(StatusCode::OK, json!([])),
    ])
    .await;
    let bot = bot_client(&server).with_retries(3, 1).expect("valid policy");

    let outcome = bot
        .send_message("u", "hello", &CancellationToken::new())
        .await
        .expect("valid request");

    assert_eq!(
        outcome.failure_reason(),
        Some(&FailureReason::ServerError { status: 500 })
    );
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn bot_timeouts_are_retried_when_enabled() {
    let slow = || MockResponse::json(StatusCode::OK, json!([])).with_delay(Duration::from_millis(400));
    let server = spawn_server(vec![slow(), slow()]).await;
    let bot = bot_client(&server)
        .with_options(BotOptions {
            webhook_timeout_ms: 40,
            ..BotOptions::default()
        })
        .with_retries(2, 1)
        .expect("valid policy");

    let outcome = bot
        .send_message("u", "hello", &CancellationToken::new())
        .await
        .expect("valid request");

    assert_eq!(outcome.failure_reason(), Some(&FailureReason::Timeout));
    assert_eq!(outcome.attempts_used(), 2);
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn assistant_prefers_bot_reply() {
    let bot_server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!([{"text": "Water fountain next to gym."}, {"text": "Need a map?"}]),
    )])
    .await;
    let completion_server = spawn_server(vec![]).await;
    let assistant = CampusAssistant::new(
        Some(bot_client(&bot_server)),
        Some(completion_client(&completion_server)),
    );

    let reply = assistant
        .reply(
            ChatTurn::new("water?", Language::En).with_sender("visitor"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(reply.origin, ReplyOrigin::Bot);
    assert_eq!(reply.text, "Water fountain next to gym.\nNeed a map?");
    assert_eq!(bot_server.requests()[0].json()["sender"], "visitor");
    assert_eq!(completion_server.hits(), 0);
}

#[tokio::test]
async fn assistant_falls_back_to_completion() {
    let bot_server = spawn_server(vec![MockResponse::json(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({}),
    )])
    .await;
    let completion_server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        completion_body("Trash cans are by each entrance."),
    )])
    .await;
    let assistant = CampusAssistant::new(
        Some(bot_client(&bot_server)),
        Some(completion_client(&completion_server)),
    );

    let reply = assistant
        .reply(ChatTurn::new("trash?", Language::En), &CancellationToken::new())
        .await;

    assert_eq!(reply.origin, ReplyOrigin::Completion);
    assert_eq!(reply.text, "Trash cans are by each entrance.");
    assert_eq!(bot_server.requests()[0].json()["sender"], "default");
}

#[tokio::test]
async fn assistant_falls_back_when_bot_has_no_text() {
    let bot_server = spawn_server(vec![MockResponse::json(StatusCode::OK, json!([]))]).await;
    let completion_server =
        spawn_server(vec![MockResponse::json(StatusCode::OK, completion_body("fallback"))]).await;
    let assistant = CampusAssistant::new(
        Some(bot_client(&bot_server)),
        Some(completion_client(&completion_server)),
    );

    let reply = assistant
        .reply(ChatTurn::new("hi", Language::Zh), &CancellationToken::new())
        .await;

    assert_eq!(reply.origin, ReplyOrigin::Completion);
    assert_eq!(reply.text, "fallback");
}

#[tokio::test]
async fn assistant_reports_localized_failure() {
    let bot_server = spawn_server(vec![MockResponse::json(
        StatusCode::BAD_GATEWAY,
        json!({}),
    )])
    .await;
    let completion_server = spawn_server(vec![MockResponse::json(
        StatusCode::FORBIDDEN,
        json!({"error": {"message": "API key not valid"}}),
    )])
    .await;
    let assistant = CampusAssistant::new(
        Some(bot_client(&bot_server)),
        Some(completion_client(&completion_server)),
    );

    let reply = assistant
        .reply(ChatTurn::new("廁所", Language::Zh), &CancellationToken::new())
        .await;

    let reason = FailureReason::AuthError { status: 403 };
    assert_eq!(reply.text, failure_message(&reason, Language::Zh));
    assert_eq!(reply.origin, ReplyOrigin::Failure(reason));
    assert_eq!(completion_server.hits(), 1);
}

#[tokio::test]
async fn cancelled_turn_skips_completion_fallback() {
    let bot_server = spawn_server(vec![]).await;
    let completion_server = spawn_server(vec![]).await;
    let assistant = CampusAssistant::new(
        Some(bot_client(&bot_server)),
        Some(completion_client(&completion_server)),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let reply = assistant.reply(ChatTurn::new("hi", Language::En), &cancel).await;

    assert_eq!(reply.origin, ReplyOrigin::Failure(FailureReason::Cancelled));
    assert_eq!(bot_server.hits(), 0);
    assert_eq!(completion_server.hits(), 0);
}

#[tokio::test]
async fn blank_turn_never_reaches_a_backend() {
    let bot_server = spawn_server(vec![]).await;
    let completion_server = spawn_server(vec![]).await;
    let assistant = CampusAssistant::new(
        Some(bot_client(&bot_server)),
        Some(completion_client(&completion_server)),
    );

    let reply = assistant
        .reply(ChatTurn::new("   ", Language::En), &CancellationToken::new())
        .await;

    assert_eq!(reply.origin, ReplyOrigin::EmptyInput);
    assert_eq!(reply.text, empty_input_message(Language::En));
    assert_eq!(bot_server.hits(), 0);
    assert_eq!(completion_server.hits(), 0);
}
