//! Passthrough: an A-format upstream sees the inbound body verbatim and
//! the client gets the upstream body verbatim.

use super::common::{client, mock_anthropic, post_messages, spawn_app, spawn_proxy};
use serde_json::json;

fn yaml(upstream_url: &str) -> String {
    format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: {upstream_url}
subagents:
  enable: false
"#
    )
}

#[tokio::test]
async fn non_streaming_body_is_byte_identical_both_ways() {
    let reply = json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "model": "claude-3-5-sonnet-20241022",
        "content": [{"type": "text", "text": "hello"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 2, "output_tokens": 1}
    });
    let (upstream_url, captured) = mock_anthropic(200, reply.clone()).await;
    let proxy = spawn_proxy(&yaml(&upstream_url)).await;

    let body = r#"{"model":"claude-3-5-sonnet-20241022","messages":[{"role":"user","content":"hi"}],"max_tokens":64,"stream":false}"#;
    let (status, text) = post_messages(&proxy, body).await;

    assert_eq!(status, 200);
    assert_eq!(serde_json::from_str::<serde_json::Value>(&text).unwrap(), reply);

    assert_eq!(captured.hit_count(), 1);
    let seen = captured.bodies.lock().unwrap();
    assert_eq!(seen[0].as_ref(), body.as_bytes(), "upstream body must be verbatim");
    // The client's credentials pass through untouched.
    assert_eq!(
        captured.api_keys.lock().unwrap()[0].as_deref(),
        Some("sk-e2e-client")
    );
}

#[tokio::test]
async fn configured_api_key_overrides_client_key() {
    let (upstream_url, captured) = mock_anthropic(200, json!({"ok": true})).await;
    let proxy = spawn_proxy(&format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: {upstream_url}
    api_key: sk-configured
"#
    ))
    .await;

    post_messages(
        &proxy,
        r#"{"model":"m","messages":[{"role":"user","content":"hi"}],"max_tokens":8}"#,
    )
    .await;
    assert_eq!(
        captured.api_keys.lock().unwrap()[0].as_deref(),
        Some("sk-configured")
    );
}

#[tokio::test]
async fn streaming_passthrough_forwards_upstream_bytes() {
    // An A-format upstream already speaks the client's SSE dialect; the
    // proxy must not re-frame it.
    let sse_body = "event: message_start\ndata: {\"type\":\"message_start\"}\n\nevent: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";
    let app = axum::Router::new().route(
        "/v1/messages",
        axum::routing::post(move || {
            let body = sse_body.to_string();
            async move { ([("content-type", "text/event-stream")], body) }
        }),
    );
    let upstream_url = spawn_app(app).await;
    let proxy = spawn_proxy(&yaml(&upstream_url)).await;

    let response = client()
        .post(format!("{}/v1/messages", proxy.url))
        .header("content-type", "application/json")
        .body(r#"{"model":"m","messages":[{"role":"user","content":"hi"}],"max_tokens":8,"stream":true}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let text = response.text().await.unwrap();
    assert_eq!(text, sse_body);
}
