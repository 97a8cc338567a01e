//! Integration tests for the API layer.
//!
//! These tests spin up a real HTTP server on a random port backed by a
//! temporary SQLite database, with stub embedding and digest providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beebo_api::{create_router, AppState, RouterOptions, ServerConfig};
use beebo_common::{BeeboError, Result};
use beebo_memory::{DedupPolicy, EmbeddingProvider, Memory, MemoryStore, Summarizer};
use serde_json::Value;
use tempfile::TempDir;

const TOKEN: &str = "test-token";

/// Vectors keyed on a few words so rephrasings of the same fact collide.
/// Text without any keyword gets no embedding at all.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        let flag = |word: &str| if text.contains(word) { 1.0 } else { 0.0 };
        let vector = vec![flag("dentist"), flag("groceries"), flag("adam")];
        if vector.iter().all(|v| *v == 0.0) {
            return Err(BeeboError::EmbeddingUnavailable("no keywords".into()));
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "keyword"
    }
}

struct CountingSummarizer;

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(&self, items: &[Memory]) -> Result<Option<String>> {
        Ok(Some(format!("- {} items", items.len())))
    }
}

struct TestServer {
    base: String,
    _dir: TempDir,
}

/// Spin up a test server on a random port and return its handle.
async fn start_server_with(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let dir = TempDir::new().unwrap();
    let mut config = ServerConfig::default();
    config.server.token = Some(TOKEN.into());
    config.memory.db_path = dir.path().join("beebo.db");
    config.stream.interval_ms = 100;
    configure(&mut config);

    let store = Arc::new(MemoryStore::open(&config.memory.db_path).unwrap());
    let state = AppState::with_components(
        &config,
        store,
        Some(Arc::new(KeywordEmbedder)),
        Some(Arc::new(CountingSummarizer)),
    )
    .unwrap();
    let router = create_router(Arc::new(state), &RouterOptions::from(&config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        _dir: dir,
    }
}

async fn start_test_server() -> TestServer {
    start_server_with(|_| {}).await
}

/// Helper to GET a URL with the token and return (status, body_string).
async fn get(server: &TestServer, path: &str) -> (u16, String) {
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}{}", server.base, path))
        .header("x-mcp-token", TOKEN)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    (status, body)
}

/// Helper to POST JSON with the token and return (status, body_string).
async fn post_json(server: &TestServer, path: &str, json: &str) -> (u16, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}{}", server.base, path))
        .header("content-type", "application/json")
        .header("x-mcp-token", TOKEN)
        .body(json.to_string())
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    (status, body)
}

async fn delete(server: &TestServer, path: &str) -> (u16, String) {
    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("{}{}", server.base, path))
        .header("x-mcp-token", TOKEN)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap();
    (status, body)
}

fn json(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test]
async fn test_liveness_routes_skip_auth() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/ping", server.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "pong");

    let resp = client.get(format!("{}/version", server.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body = json(&resp.text().await.unwrap());
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let resp = client.get(format!("{}/healthz", server.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body = json(&resp.text().await.unwrap());
    assert_eq!(body["status"], "ok");
    assert_eq!(body["memories"], 0);
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_or_wrong_token_is_401() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/memories/all", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body = json(&resp.text().await.unwrap());
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "Invalid or missing token");

    let resp = client
        .get(format!("{}/memories/all", server.base))
        .header("x-mcp-token", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}

#[tokio::test]
async fn test_bearer_and_query_tokens_accepted() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/memories/all", server.base))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let resp = client
        .get(format!("{}/memories/all?token={}", server.base, TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn test_open_gate_without_token() {
    let server = start_server_with(|c| c.server.token = None).await;
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/memories/all", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

// ============================================================================
// Ingest
// ============================================================================

#[tokio::test]
async fn test_repeat_post_updates_single_row() {
    let server = start_test_server().await;

    let (status, body) = post_json(
        &server,
        "/memories",
        r#"{"text": "Meeting with Adam tomorrow at 4pm", "tags": ["work"]}"#,
    )
    .await;
    assert_eq!(status, 200);
    let first = json(&body);
    assert_eq!(first["ok"], true);
    assert!(first.get("updated").is_none());
    let id = first["id"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &server,
        "/memories",
        r#"{"text": "  meeting with adam tomorrow at 4PM", "tags": "work, calendar"}"#,
    )
    .await;
    assert_eq!(status, 200);
    let second = json(&body);
    assert_eq!(second["ok"], true);
    assert_eq!(second["updated"], true);
    assert_eq!(second["id"], id.as_str());

    let (status, body) = get(&server, "/memories/recall?q=adam").await;
    assert_eq!(status, 200);
    let recall = json(&body);
    assert_eq!(recall["ok"], true);
    assert_eq!(recall["found"], true);
    assert_eq!(recall["count"], 1);
    assert_eq!(recall["memories"][0]["id"], id.as_str());
    assert_eq!(
        recall["memories"][0]["tags"],
        serde_json::json!(["work", "calendar"])
    );
}

#[tokio::test]
async fn test_reject_policy_reports_duplicate() {
    let server = start_server_with(|c| c.memory.dedup_policy = DedupPolicy::Reject).await;

    post_json(&server, "/memories", r#"{"text": "Buy milk"}"#).await;
    let (status, body) = post_json(&server, "/memories", r#"{"text": "BUY MILK "}"#).await;
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "duplicate");
    assert_eq!(body["existing"]["text"], "Buy milk");
}

#[tokio::test]
async fn test_semantic_duplicate_rejected() {
    let server = start_test_server().await;

    let (_, body) = post_json(&server, "/memories", r#"{"text": "Dentist appointment Friday"}"#).await;
    let original = json(&body);

    let (status, body) = post_json(&server, "/memories", r#"{"text": "Friday: see the dentist"}"#).await;
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "semantic duplicate");
    assert_eq!(body["existing"]["id"], original["id"]);
    assert!(body["similarity"].as_f64().unwrap() > 0.9);

    let (status, body) = post_json(&server, "/memories", r#"{"text": "Buy groceries"}"#).await;
    assert_eq!(status, 200);
    assert_eq!(json(&body)["ok"], true);
}

#[tokio::test]
async fn test_invalid_bodies_are_400() {
    let server = start_test_server().await;

    let (status, body) = post_json(&server, "/memories", r#"{"type": "note"}"#).await;
    assert_eq!(status, 400);
    assert_eq!(json(&body)["error"], "text required");

    let (status, _) = post_json(&server, "/memories", r#"{"text": "   "}"#).await;
    assert_eq!(status, 400);

    let (status, body) = post_json(&server, "/memories", "{not json").await;
    assert_eq!(status, 400);
    assert_eq!(json(&body)["ok"], false);

    let (status, _) = post_json(&server, "/memories", r#"{"text": "x", "tags": 5}"#).await;
    assert_eq!(status, 400);

    let (status, _) = post_json(&server, "/memories", r#"{"text": "x", "ts": "soon"}"#).await;
    assert_eq!(status, 400);
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_filters_and_listing() {
    let server = start_test_server().await;

    post_json(&server, "/memories", r#"{"text": "Standup at 9", "tags": ["work", "urgent"], "type": "event"}"#).await;
    post_json(&server, "/memories", r#"{"text": "Call the plumber", "tags": "[\"home\"]"}"#).await;
    post_json(&server, "/memories", r#"{"text": "Quarterly review", "tags": ["workshop"]}"#).await;

    let (status, body) = get(&server, "/memories/by-tag?tag=work").await;
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["count"], 1);
    assert_eq!(body["memories"][0]["text"], "Standup at 9");

    let (_, body) = get(&server, "/memories/by-tag?tag=urgent").await;
    let body = json(&body);
    assert_eq!(body["count"], 1);
    assert_eq!(body["memories"][0]["text"], "Standup at 9");

    let (_, body) = get(&server, "/memories/by-tag?tag=home").await;
    let body = json(&body);
    assert_eq!(body["count"], 1);
    assert_eq!(body["memories"][0]["text"], "Call the plumber");

    let (_, body) = get(&server, "/memories/by-type?type=event").await;
    assert_eq!(json(&body)["count"], 1);

    let (_, body) = get(&server, "/memories/all").await;
    let body = json(&body);
    assert_eq!(body["count"], 3);
    assert_eq!(body["memories"][0]["text"], "Quarterly review");

    let (_, body) = get(&server, "/memories/all?limit=1").await;
    assert_eq!(json(&body)["count"], 1);

    let (_, body) = get(&server, "/memories/today").await;
    assert_eq!(json(&body)["count"], 3);

    let (_, body) = get(&server, "/memories/search?q=PLUMBER").await;
    assert_eq!(json(&body)["count"], 1);
}

#[tokio::test]
async fn test_text_only_resend_keeps_tags() {
    let server = start_test_server().await;

    let (_, body) = post_json(
        &server,
        "/memories",
        r#"{"text": "Pick up dry cleaning", "type": "errand", "tags": ["home"], "source": "voice"}"#,
    )
    .await;
    let id = json(&body)["id"].as_str().unwrap().to_string();

    let (status, body) = post_json(&server, "/memories", r#"{"text": "pick up dry cleaning"}"#).await;
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["updated"], true);
    assert_eq!(body["id"], id.as_str());

    let (_, body) = get(&server, &format!("/memories/{id}")).await;
    let memory = json(&body);
    assert_eq!(memory["type"], "errand");
    assert_eq!(memory["tags"], serde_json::json!(["home"]));
    assert_eq!(memory["source"], "voice");

    let (_, body) = get(&server, "/memories/by-tag?tag=home").await;
    assert_eq!(json(&body)["count"], 1);
}

#[tokio::test]
async fn test_missing_filter_params_are_400() {
    let server = start_test_server().await;
    assert_eq!(get(&server, "/memories/by-tag").await.0, 400);
    assert_eq!(get(&server, "/memories/by-type?type=").await.0, 400);
    assert_eq!(get(&server, "/memories/recall").await.0, 400);
    assert_eq!(get(&server, "/memories/all?limit=lots").await.0, 400);
}

#[tokio::test]
async fn test_recall_without_match() {
    let server = start_test_server().await;
    let (status, body) = get(&server, "/memories/recall?q=nothing").await;
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["found"], false);
    assert_eq!(body["count"], 0);
    assert_eq!(body["memories"], serde_json::json!([]));
}

#[tokio::test]
async fn test_get_and_delete_by_id() {
    let server = start_test_server().await;

    let (_, body) = post_json(&server, "/memories", r#"{"text": "Renew passport", "source": "voice"}"#).await;
    let id = json(&body)["id"].as_str().unwrap().to_string();

    let (status, body) = get(&server, &format!("/memories/{id}")).await;
    assert_eq!(status, 200);
    let memory = json(&body);
    assert_eq!(memory["text"], "Renew passport");
    assert_eq!(memory["source"], "voice");
    assert_eq!(memory["type"], "note");

    let (status, body) = delete(&server, &format!("/memories/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(json(&body), serde_json::json!({"ok": true, "deleted": true}));

    let (status, body) = delete(&server, &format!("/memories/{id}")).await;
    assert_eq!(status, 404);
    assert_eq!(json(&body), serde_json::json!({"ok": false, "error": "not found"}));

    let (status, _) = get(&server, &format!("/memories/{id}")).await;
    assert_eq!(status, 404);
}

// ============================================================================
// Change stream
// ============================================================================

/// Read SSE chunks until `needle` appears or the deadline passes.
async fn read_until(resp: &mut reqwest::Response, buffer: &mut String, needle: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !buffer.contains(needle) {
        let chunk = tokio::time::timeout_at(deadline, resp.chunk())
            .await
            .expect("stream produced data in time")
            .unwrap()
            .expect("stream still open");
        buffer.push_str(&String::from_utf8_lossy(&chunk));
    }
}

#[tokio::test]
async fn test_sse_stream_sequence() {
    let server = start_test_server().await;
    post_json(&server, "/memories", r#"{"text": "First thing"}"#).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    post_json(&server, "/memories", r#"{"text": "Second thing"}"#).await;

    let mut resp = reqwest::Client::new()
        .get(format!("{}/mcp/sse?token={}", server.base, TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut buffer = String::new();
    read_until(&mut resp, &mut buffer, ": ping").await;

    let welcome = buffer.find("event: mcp_welcome").unwrap();
    let first = buffer.find("First thing").unwrap();
    let second = buffer.find("Second thing").unwrap();
    let summary = buffer.find("event: synth_summary").unwrap();
    let ping = buffer.find(": ping").unwrap();
    assert!(welcome < first && first < second && second < summary && summary < ping);
    assert!(buffer.contains("Beebo memory bridge connected"));
    assert!(buffer.contains("\"type\":\"memory_item\""));
    assert!(buffer.contains("- 2 items"));
}

#[tokio::test]
async fn test_sse_pushes_new_items() {
    let server = start_test_server().await;

    let mut resp = reqwest::Client::new()
        .get(format!("{}/mcp/sse", server.base))
        .header("x-mcp-token", TOKEN)
        .send()
        .await
        .unwrap();
    let mut buffer = String::new();
    read_until(&mut resp, &mut buffer, "event: mcp_welcome").await;

    post_json(&server, "/memories", r#"{"text": "Arrived while streaming"}"#).await;
    read_until(&mut resp, &mut buffer, "Arrived while streaming").await;
}

#[tokio::test]
async fn test_sse_requires_token() {
    let server = start_test_server().await;
    let resp = reqwest::Client::new()
        .get(format!("{}/mcp/sse", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}
