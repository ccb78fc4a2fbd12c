//! HTTP end-to-end tests
//!
//! Each test binds the real router on an ephemeral port and talks to it with
//! `reqwest`, so status codes, headers and the SSE body are checked exactly
//! as a browser would receive them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use arena_core::testing::{BranchScript, ScriptStep, ScriptedBackend};
use arena_core::{AppState, ChatBackend, FanIn, MergeConfig};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

fn app_state(backend: &ScriptedBackend) -> AppState {
    let backend: Arc<dyn ChatBackend> = Arc::new(backend.clone());
    let fan_in = FanIn::new(
        Arc::clone(&backend),
        MergeConfig {
            poll_interval: Duration::from_millis(20),
            max_models: Some(4),
            ..Default::default()
        },
    );
    AppState::new(backend, fan_in)
}

impl TestServer {
    async fn start(backend: &ScriptedBackend) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(arena_core::serve(
            listener,
            app_state(backend),
            std::future::pending::<()>(),
        ));

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Split an SSE body into the JSON payload of each `data:` frame
fn parse_frames(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            let payload = frame
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("frame without data prefix: {frame:?}"));
            serde_json::from_str(payload).unwrap()
        })
        .collect()
}

fn by_model(frames: &[Value]) -> HashMap<String, Vec<Value>> {
    let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
    for frame in frames {
        let model = frame["model"].as_str().unwrap().to_string();
        grouped.entry(model).or_default().push(frame.clone());
    }
    grouped
}

async fn wait_for_live_streams(backend: &ScriptedBackend, expected: usize) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.live_streams() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

// =============================================================================
// Models and health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let server = TestServer::start(&ScriptedBackend::new()).await;

    let body: Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "model-arena");
}

#[tokio::test]
async fn test_list_models() {
    let backend = ScriptedBackend::new()
        .with_script("mistral", BranchScript::tokens(["x"]))
        .with_script("llama3", BranchScript::tokens(["y"]));
    let server = TestServer::start(&backend).await;

    let response = reqwest::get(server.url("/api/v1/models")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "models": ["llama3", "mistral"] }));
}

#[tokio::test]
async fn test_list_models_backend_failure() {
    let backend =
        ScriptedBackend::new().with_model_list(Err("connection refused".to_string()));
    let server = TestServer::start(&backend).await;

    // The page renders the error instead of the list, so this is not a 5xx
    let response = reqwest::get(server.url("/api/v1/models")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "error": "Failed to get models: connection refused" })
    );
}

// =============================================================================
// Generate
// =============================================================================

#[tokio::test]
async fn test_generate_streams_every_model() {
    let backend = ScriptedBackend::new()
        .with_script("a", BranchScript::tokens(["H", "i"]))
        .with_script("b", BranchScript::open_error("unreachable"));
    let server = TestServer::start(&backend).await;

    let response = reqwest::Client::new()
        .post(server.url("/api/v1/generate"))
        .json(&json!({ "prompt": "hi", "models": ["a", "b"] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response.headers()["cache-control"].to_str().unwrap(),
        "no-cache"
    );

    let body = response.text().await.unwrap();
    let frames = parse_frames(&body);
    let grouped = by_model(&frames);

    assert_eq!(
        grouped["a"],
        vec![
            json!({ "model": "a", "token": "H", "done": false }),
            json!({ "model": "a", "token": "i", "done": false }),
            json!({ "model": "a", "token": "", "done": true }),
        ]
    );
    assert_eq!(
        grouped["b"],
        vec![json!({ "model": "b", "error": "unreachable", "done": true })]
    );

    let prompts: Vec<String> = backend.requests().into_iter().map(|r| r.prompt).collect();
    assert_eq!(prompts, vec!["hi", "hi"]);
}

#[tokio::test]
async fn test_generate_is_flushed_incrementally() {
    let backend = ScriptedBackend::new().with_script(
        "slow",
        BranchScript::steps(vec![
            ScriptStep::Token("first".into()),
            ScriptStep::Delay(Duration::from_millis(500)),
            ScriptStep::Token("second".into()),
            ScriptStep::Complete,
        ]),
    );
    let server = TestServer::start(&backend).await;

    let mut response = reqwest::Client::new()
        .post(server.url("/api/v1/generate"))
        .json(&json!({ "prompt": "hi", "models": ["slow"] }))
        .send()
        .await
        .unwrap();

    // The first fragment arrives well before the branch finishes
    let first = tokio::time::timeout(Duration::from_millis(400), response.chunk())
        .await
        .expect("first frame should be flushed immediately")
        .unwrap()
        .unwrap();
    let first = String::from_utf8(first.to_vec()).unwrap();
    assert_eq!(
        parse_frames(&first),
        vec![json!({ "model": "slow", "token": "first", "done": false })]
    );

    let mut rest = String::new();
    while let Some(chunk) = response.chunk().await.unwrap() {
        rest.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    assert_eq!(parse_frames(&rest).len(), 2);
}

#[tokio::test]
async fn test_generate_rejects_bad_requests() {
    let backend = ScriptedBackend::new().with_script("a", BranchScript::tokens(["x"]));
    let server = TestServer::start(&backend).await;
    let client = reqwest::Client::new();

    let cases = [
        (json!({ "prompt": "hi", "models": [] }), Some("at least one model is required")),
        (json!({ "prompt": "", "models": ["a"] }), Some("prompt must not be empty")),
        (
            json!({ "prompt": "hi", "models": ["a", "a", "a", "a", "a"] }),
            Some("too many models: 5 requested, at most 4 allowed"),
        ),
        (json!({ "models": ["a"] }), None),
        (json!({ "prompt": "hi", "models": "a" }), None),
    ];

    for (payload, expected) in cases {
        let response = client
            .post(server.url("/api/v1/generate"))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "payload {payload}");

        let body: Value = response.json().await.unwrap();
        let message = body["error"].as_str().unwrap();
        if let Some(expected) = expected {
            assert_eq!(message, expected);
        } else {
            assert!(!message.is_empty());
        }
    }

    let response = client
        .post(server.url("/api/v1/generate"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Nothing was ever sent to the backend
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_client_disconnect_cancels_branches() {
    let drip: Vec<ScriptStep> = (0..2000)
        .flat_map(|i| {
            [
                ScriptStep::Token(format!("{i}")),
                ScriptStep::Delay(Duration::from_millis(5)),
            ]
        })
        .collect();
    let backend = ScriptedBackend::new().with_script("drip", BranchScript::steps(drip));
    let server = TestServer::start(&backend).await;

    let mut response = reqwest::Client::new()
        .post(server.url("/api/v1/generate"))
        .json(&json!({ "prompt": "hi", "models": ["drip", "drip"] }))
        .send()
        .await
        .unwrap();
    assert!(response.chunk().await.unwrap().is_some());
    assert!(wait_for_live_streams(&backend, 2).await);

    drop(response);

    assert!(
        wait_for_live_streams(&backend, 0).await,
        "branches kept streaming after disconnect"
    );
}

#[tokio::test]
async fn test_shutdown_ends_hung_streams() {
    let backend = ScriptedBackend::new().with_script(
        "stuck",
        BranchScript::steps(vec![ScriptStep::Token("x".into()), ScriptStep::Hang]),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(arena_core::serve(listener, app_state(&backend), async {
        let _ = stop_rx.await;
    }));

    let mut response = reqwest::Client::new()
        .post(format!("{base_url}/api/v1/generate"))
        .json(&json!({ "prompt": "hi", "models": ["stuck"] }))
        .send()
        .await
        .unwrap();
    assert!(response.chunk().await.unwrap().is_some());
    assert!(wait_for_live_streams(&backend, 1).await);

    stop_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server should stop promptly after shutdown")
        .unwrap();
    assert!(result.is_ok());
    assert!(
        wait_for_live_streams(&backend, 0).await,
        "backend stream still open after shutdown"
    );
}
