//! In-process OpenAI-compatible stub servers for tests.

use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warp::Filter;
use warp::http::StatusCode;

#[derive(Debug, Clone)]
pub struct StubBehavior {
    pub status: u16,
    pub delay: Duration,
    pub body: Value,
    pub models: Vec<String>,
}

impl StubBehavior {
    pub fn ok() -> Self {
        Self {
            status: 200,
            delay: Duration::ZERO,
            body: json!({
                "choices": [{"message": {"role": "assistant", "content": " hello from stub "}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
            }),
            models: vec!["stub-model".to_string()],
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: json!({"error": "stubbed failure"}),
            ..Self::ok()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }
}

#[derive(Default)]
struct StubState {
    hits: AtomicUsize,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
    requests: Mutex<Vec<Value>>,
}

pub struct StubServer {
    pub addr: SocketAddr,
    state: Arc<StubState>,
}

impl StubServer {
    pub fn api_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Root URL without the `/v1` suffix.
    pub fn root_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Highest number of chat requests observed in flight at once.
    pub fn max_inflight(&self) -> usize {
        self.state.max_inflight.load(Ordering::SeqCst)
    }

    /// Chat-completion request bodies in arrival order.
    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }
}

pub async fn spawn_stub(behavior: StubBehavior) -> StubServer {
    let state = Arc::new(StubState::default());
    let behavior = Arc::new(behavior);

    let models_behavior = Arc::clone(&behavior);
    let models = warp::path!("v1" / "models").and(warp::get()).map(move || {
        let data: Vec<Value> = models_behavior
            .models
            .iter()
            .map(|id| json!({"id": id, "object": "model", "owned_by": "stub"}))
            .collect();
        warp::reply::json(&json!({"object": "list", "data": data}))
    });

    let chat_state = Arc::clone(&state);
    let chat = warp::path!("v1" / "chat" / "completions")
        .and(warp::post())
        .and(warp::body::json())
        .and(warp::any().map(move || Arc::clone(&chat_state)))
        .and(warp::any().map(move || Arc::clone(&behavior)))
        .and_then(handle_chat);

    let (addr, server) = warp::serve(models.or(chat)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    StubServer { addr, state }
}

async fn handle_chat(
    body: Value,
    state: Arc<StubState>,
    behavior: Arc<StubBehavior>,
) -> Result<impl warp::Reply, Infallible> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(body);

    let inflight = state.inflight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_inflight.fetch_max(inflight, Ordering::SeqCst);

    if !behavior.delay.is_zero() {
        tokio::time::sleep(behavior.delay).await;
    }

    state.inflight.fetch_sub(1, Ordering::SeqCst);

    let status = StatusCode::from_u16(behavior.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok(warp::reply::with_status(
        warp::reply::json(&behavior.body),
        status,
    ))
}
