#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use analytics_api::auth::api_key::generate_api_key;
use analytics_api::auth::tokens::{issue_token, TOKEN_TTL_SECS};
use analytics_api::config::Config;
use analytics_api::db::memory::MemoryStore;
use analytics_api::db::store::AnalyticsStore;
use analytics_api::realtime::Realtime;
use analytics_api::AppState;
use nexora_common::id::{prefix, prefixed_ulid};

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

/// An organization with one member and one active API key.
pub struct TestOrg {
    pub org_id: String,
    pub user_id: String,
    pub token: String,
    pub api_key: String,
    pub key_id: String,
}

/// Build a test AppState over a fresh in-memory store.
pub fn test_state() -> (AppState, Arc<MemoryStore>) {
    let config = Config::with_secret(TEST_SECRET);
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn AnalyticsStore> = memory.clone();

    let state = AppState {
        store,
        realtime: Arc::new(Realtime::new(config.schedule())),
        config: Arc::new(config),
    };

    (state, memory)
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState, Arc<MemoryStore>) {
    let (state, memory) = test_state();
    let app = analytics_api::routes::router().with_state(state.clone());
    (app, state, memory)
}

/// Start an actual TCP server for streaming tests. The server runs in the background.
pub async fn start_server() -> (SocketAddr, AppState, Arc<MemoryStore>) {
    let (app, state, memory) = test_app();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, memory)
}

pub fn seed_org(memory: &MemoryStore, name: &str) -> TestOrg {
    let org = memory.add_organization(name, &name.to_lowercase());
    let user_id = prefixed_ulid(prefix::USER);
    memory.add_member(&org.id, &user_id, "owner");

    let api_key = generate_api_key();
    let key_id = memory.add_api_key(&org.id, "test", &api_key, true);

    TestOrg {
        org_id: org.id,
        token: token_for(&user_id),
        user_id,
        api_key,
        key_id,
    }
}

pub fn token_for(user_id: &str) -> String {
    issue_token(TEST_SECRET, user_id, TOKEN_TTL_SECS).expect("issue test token")
}

pub fn track_body(api_key: &str, event_name: &str) -> Value {
    serde_json::json!({
        "apiKey": api_key,
        "eventName": event_name,
        "pageUrl": "https://acme.test/pricing",
        "visitorsId": "visitor-1",
        "sessionId": "session-1",
    })
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// Reads `data:` payloads from a server-sent event body.
pub struct SseReader<S> {
    stream: Pin<Box<S>>,
    buf: String,
}

impl<S, B, E> SseReader<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Debug,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Box::pin(stream),
            buf: String::new(),
        }
    }

    /// Next message, or `None` if nothing arrives within `wait` or the stream ends.
    pub async fn next_within(&mut self, wait: Duration) -> Option<Value> {
        loop {
            if let Some(idx) = self.buf.find("\n\n") {
                let block: String = self.buf.drain(..idx + 2).collect();
                let data: String = block
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim_start)
                    .collect();
                if data.is_empty() {
                    continue;
                }
                return Some(serde_json::from_str(&data).expect("frame is JSON"));
            }

            match tokio::time::timeout(wait, self.stream.next()).await {
                Ok(Some(chunk)) => {
                    let chunk = chunk.expect("stream chunk");
                    self.buf.push_str(std::str::from_utf8(chunk.as_ref()).expect("utf-8"));
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }

    pub async fn next_message(&mut self) -> Value {
        self.next_within(Duration::from_secs(5))
            .await
            .expect("expected an SSE message")
    }
}

/// Open `GET /api/realtime/events` and return the reader once the `connected` frame arrived.
pub async fn subscribe(
    addr: SocketAddr,
    org: &TestOrg,
) -> SseReader<impl Stream<Item = reqwest::Result<impl AsRef<[u8]>>>> {
    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/realtime/events"))
        .query(&[("orgId", org.org_id.as_str())])
        .bearer_auth(&org.token)
        .send()
        .await
        .expect("subscribe request");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let mut reader = SseReader::new(resp.bytes_stream());
    let connected = reader.next_message().await;
    assert_eq!(connected["type"], "connected");
    reader
}
