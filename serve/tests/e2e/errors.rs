//! Error envelopes: every failure surfaces as
//! `{"type":"error","error":{...}}` with the right status.

use super::common::{mock_anthropic, post_messages, spawn_proxy};
use serde_json::json;

#[tokio::test]
async fn malformed_body_is_a_400_validation_error() {
    let (upstream_url, captured) = mock_anthropic(200, json!({"ok": true})).await;
    let proxy = spawn_proxy(&format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: {upstream_url}
"#
    ))
    .await;

    let (status, text) = post_messages(&proxy, "{not json").await;
    assert_eq!(status, 400);
    let envelope: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(envelope["type"], "error");
    assert_eq!(envelope["error"]["type"], "validation_error");
    assert_eq!(captured.hit_count(), 0);
}

#[tokio::test]
async fn unreachable_upstream_is_a_502_transport_error() {
    let proxy = spawn_proxy(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: http://127.0.0.1:9
    max_retries: 0
"#,
    )
    .await;

    let (status, text) = post_messages(
        &proxy,
        r#"{"model":"m","messages":[{"role":"user","content":"hi"}],"max_tokens":8}"#,
    )
    .await;
    assert_eq!(status, 502);
    let envelope: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(envelope["error"]["type"], "upstream_transport_error");
}

#[tokio::test]
async fn slow_upstream_hits_the_request_deadline() {
    let app = axum::Router::new().route(
        "/v1/messages",
        axum::routing::post(|| async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            "too late"
        }),
    );
    let upstream_url = super::common::spawn_app(app).await;
    let proxy = spawn_proxy(&format!(
        r#"
server:
  request_timeout_secs: 1
providers:
  anthropic:
    format: anthropic
    base_url: {upstream_url}
    max_retries: 0
"#
    ))
    .await;

    let started = std::time::Instant::now();
    let (status, text) = post_messages(
        &proxy,
        r#"{"model":"m","messages":[{"role":"user","content":"hi"}],"max_tokens":8}"#,
    )
    .await;
    assert_eq!(status, 502);
    assert!(text.contains("deadline"));
    assert!(started.elapsed() < std::time::Duration::from_secs(3));
}

#[tokio::test]
async fn upstream_error_body_is_preserved_in_the_envelope() {
    let (upstream_url, _captured) = mock_anthropic(
        529,
        json!({"type": "error", "error": {"type": "overloaded_error", "message": "try later"}}),
    )
    .await;
    let proxy = spawn_proxy(&format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: {upstream_url}
    max_retries: 0
"#
    ))
    .await;

    let (status, text) = post_messages(
        &proxy,
        r#"{"model":"m","messages":[{"role":"user","content":"hi"}],"max_tokens":8}"#,
    )
    .await;
    assert_eq!(status, 529);
    let envelope: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(envelope["error"]["type"], "upstream_http_error");
    assert!(envelope["error"]["message"]
        .as_str()
        .unwrap()
        .contains("overloaded_error"));
}
