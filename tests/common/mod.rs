#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value as JsonValue};

#[derive(Clone)]
enum MockBody {
    Json(JsonValue),
    Raw(String),
}

#[derive(Clone)]
pub struct MockResponse {
    status: StatusCode,
    body: MockBody,
    delay: Duration,
    retry_after: Option<&'static str>,
}

impl MockResponse {
    pub fn json(status: StatusCode, body: JsonValue) -> Self {
        Self {
            status,
            body: MockBody::Json(body),
            delay: Duration::from_millis(0),
            retry_after: None,
        }
    }

    pub fn raw(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: MockBody::Raw(body.into()),
            delay: Duration::from_millis(0),
            retry_after: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_retry_after(mut self, value: &'static str) -> Self {
        self.retry_after = Some(value);
        self
    }
}

/// A request as seen by the mock upstream.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> JsonValue {
        serde_json::from_str(&self.body).expect("recorded body must be JSON")
    }
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

async fn upstream_handler(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    body: String,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .requests
        .lock()
        .expect("request log mutex must not be poisoned")
        .push(Recorded {
            method,
            path: uri.path().to_owned(),
            query: uri.query().map(str::to_owned),
            body,
        });

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "no mock response available"}),
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut out = match response.body {
        MockBody::Json(body) => (response.status, Json(body)).into_response(),
        MockBody::Raw(body) => (response.status, body).into_response(),
    };
    if let Some(value) = response.retry_after {
        out.headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static(value));
    }
    out
}

pub struct TestServer {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests
            .lock()
            .expect("request log mutex must not be poisoned")
            .clone()
    }
}

/// Serves the queued responses in order on every path and method.
pub async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        hits: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .fallback(upstream_handler)
        .with_state(state.clone());

    let (base_url, task) = serve_router(app).await;
    TestServer {
        base_url,
        hits: state.hits,
        requests: state.requests,
        task,
    }
}

pub async fn serve_router(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });
    (format!("http://{address}"), task)
}

/// An address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind probe listener");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);
    format!("http://{address}")
}

pub fn completion_body(text: &str) -> JsonValue {
    json!({
        "candidates": [
            {
                "content": { "parts": [ { "text": text } ], "role": "model" },
                "finishReason": "STOP"
            }
        ]
    })
}

pub fn safety_blocked_body() -> JsonValue {
    json!({
        "candidates": [
            {
                "content": { "parts": [ { "text": "" } ] },
                "finishReason": "SAFETY"
            }
        ]
    })
}
