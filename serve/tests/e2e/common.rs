//! Shared helpers for e2e tests: mock upstreams and a proxy bound to
//! 127.0.0.1:0. Responses are logged with `[e2e]`; run with `--nocapture`
//! to see them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use catalog::store::Store;
use catalog::Catalog;
use tokio::net::TcpListener;

/// What a mock upstream saw.
#[derive(Clone, Default)]
pub struct Captured {
    pub hits: Arc<AtomicUsize>,
    pub bodies: Arc<Mutex<Vec<Bytes>>>,
    pub api_keys: Arc<Mutex<Vec<Option<String>>>>,
    pub auth_headers: Arc<Mutex<Vec<Option<String>>>>,
}

impl Captured {
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Binds an app to a random port and serves it in the background.
pub async fn spawn_app(app: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn capturing_handler(
    path: &str,
    captured: Captured,
    status: u16,
    content_type: &'static str,
    reply: String,
) -> axum::Router {
    axum::Router::new().route(
        path,
        post(move |headers: HeaderMap, body: Bytes| {
            let captured = captured.clone();
            let reply = reply.clone();
            async move {
                captured.hits.fetch_add(1, Ordering::SeqCst);
                captured.bodies.lock().unwrap().push(body);
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                captured.api_keys.lock().unwrap().push(header("x-api-key"));
                captured
                    .auth_headers
                    .lock()
                    .unwrap()
                    .push(header("authorization"));
                (
                    StatusCode::from_u16(status).unwrap(),
                    [("content-type", content_type)],
                    reply,
                )
            }
        }),
    )
}

/// Mock A-format upstream: serves `/v1/messages` with a fixed status and
/// JSON body.
pub async fn mock_anthropic(status: u16, reply: serde_json::Value) -> (String, Captured) {
    let captured = Captured::default();
    let app = capturing_handler(
        "/v1/messages",
        captured.clone(),
        status,
        "application/json",
        reply.to_string(),
    );
    (spawn_app(app).await, captured)
}

/// Mock B-format upstream: serves `/v1/chat/completions` with a fixed
/// status and JSON body.
pub async fn mock_openai(status: u16, reply: serde_json::Value) -> (String, Captured) {
    let captured = Captured::default();
    let app = capturing_handler(
        "/v1/chat/completions",
        captured.clone(),
        status,
        "application/json",
        reply.to_string(),
    );
    (spawn_app(app).await, captured)
}

/// Mock B-format upstream that answers with a fixed SSE body.
pub async fn mock_openai_sse(frames: &[&str]) -> (String, Captured) {
    let captured = Captured::default();
    let body = frames
        .iter()
        .map(|frame| format!("data: {frame}\n\n"))
        .collect::<String>();
    let app = capturing_handler(
        "/v1/chat/completions",
        captured.clone(),
        200,
        "text/event-stream",
        body,
    );
    (spawn_app(app).await, captured)
}

/// A running proxy plus handles the tests poke at.
pub struct Proxy {
    pub url: String,
    pub catalog: Arc<Catalog>,
    _dir: tempfile::TempDir,
}

impl Proxy {
    /// Conversation root the proxy's catalogue watches.
    pub fn projects_dir(&self) -> std::path::PathBuf {
        self.catalog.root().to_path_buf()
    }
}

/// Spawns the proxy with the given YAML config, backed by a scratch
/// catalogue and conversation root.
pub async fn spawn_proxy(yaml: &str) -> Proxy {
    let dir = tempfile::tempdir().unwrap();
    let projects = dir.path().join("projects");
    std::fs::create_dir_all(&projects).unwrap();

    let config = config::Config::from_yaml_str(yaml).expect("e2e config must validate");
    let store = Store::open(dir.path().join("catalog.db")).unwrap();
    let catalog = Arc::new(Catalog::new(store, &projects, config.storage.max_fts_text));
    let state = Arc::new(serve::build_state(&config, catalog.clone(), None));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = serve::router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Proxy {
        url: format!("http://{}", addr),
        catalog,
        _dir: dir,
    }
}

/// Parses an SSE body into (event name, data JSON) pairs.
pub fn parse_sse(body: &str) -> Vec<(String, serde_json::Value)> {
    body.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .filter_map(|frame| {
            let mut event = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event = Some(rest.to_string());
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data = Some(rest.to_string());
                }
            }
            let value = serde_json::from_str(&data?).ok()?;
            Some((event?, value))
        })
        .collect()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

/// POSTs a messages request and logs the response body.
pub async fn post_messages(proxy: &Proxy, body: &str) -> (u16, String) {
    let response = client()
        .post(format!("{}/v1/messages", proxy.url))
        .header("content-type", "application/json")
        .header("x-api-key", "sk-e2e-client")
        .header("anthropic-version", "2023-06-01")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let text = response.text().await.unwrap();
    eprintln!("[e2e] {} <- {}", status, text);
    (status, text)
}
