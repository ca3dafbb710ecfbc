use axum::{routing::post, Json, Router};
use std::net::SocketAddr;

async fn serve_completion(content: &'static str) -> SocketAddr {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || async move {
            Json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Runs `cardpipe synthesize` against `addr` on a blocking thread so the fake server keeps serving.
async fn synthesize(addr: SocketAddr, request: serde_json::Value) -> std::process::Output {
    let tmp = tempfile::tempdir().unwrap();
    let config = tmp.path().join("absent.json");
    tokio::task::spawn_blocking(move || {
        assert_cmd::Command::cargo_bin("cardpipe")
            .unwrap()
            .args(["synthesize", "--request", "-"])
            .env_remove("CARDPIPE_ENV_FILE")
            .env_remove("CARDPIPE_MODEL")
            .env("CARDPIPE_CONFIG_FILE", &config)
            .env("CARDPIPE_API_KEY", "sk-test")
            .env("CARDPIPE_BASE_URL", format!("http://{addr}"))
            .env("RUST_LOG", "error")
            .write_stdin(request.to_string())
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_completion_is_an_error_envelope() {
    let addr = serve_completion("not-json").await;
    let out = synthesize(
        addr,
        serde_json::json!({"action": "generate", "keyword": "rust", "searchResults": []}),
    )
    .await;
    assert_eq!(out.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["code"], "malformed_completion");
    assert!(v.get("title").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_fills_missing_fields_from_the_card() {
    let addr = serve_completion(r#"{"summary": "fresh summary"}"#).await;
    let out = synthesize(
        addr,
        serde_json::json!({
            "action": "update",
            "card": {
                "id": "c1",
                "title": "Rust",
                "summary": "old",
                "items": [{"title": "Ownership", "content": "Borrowing. [View source](https://a.test)"}],
                "tags": ["ai", "tech"],
                "type": "keyword",
                "source": "keyword:rust"
            },
            "searchResults": [{"title": "T", "content": "C", "url": "https://a.test"}]
        }),
    )
    .await;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stdout));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["summary"], "fresh summary");
    assert_eq!(v["tags"], serde_json::json!(["ai", "tech"]));
    assert_eq!(v["items"][0]["title"], "Ownership");
    assert!(v.get("title").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generate_returns_normalized_shape() {
    let addr = serve_completion(
        "```json\n{\"title\": \"Rust\", \"summary\": \"A language.\", \"items\": [{\"title\": \"a\", \"content\": \"b\"}]}\n```",
    )
    .await;
    let out = synthesize(
        addr,
        serde_json::json!({
            "action": "generate",
            "keyword": "https://example.com",
            "searchResults": {"title": "Example", "content": "{\"description\":\"An example domain\"}", "url": "https://example.com"}
        }),
    )
    .await;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stdout));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["title"], "Rust");
    assert_eq!(v["items"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(v["tags"], serde_json::json!([]));
}
