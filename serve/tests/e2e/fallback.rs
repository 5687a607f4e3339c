//! Fallback: a breaker-counted failure on the primary retries the whole
//! request once against the configured fallback.

use super::common::{mock_anthropic, mock_openai, post_messages, spawn_proxy};
use serde_json::json;

const REQUEST: &str =
    r#"{"model":"claude-3-5-sonnet-20241022","messages":[{"role":"user","content":"hi"}],"max_tokens":8}"#;

#[tokio::test]
async fn failed_primary_falls_back_once() {
    let (primary_url, primary) = mock_anthropic(503, json!({"error": "down"})).await;
    let reply = json!({
        "id": "msg_backup",
        "type": "message",
        "role": "assistant",
        "model": "claude-3-5-sonnet-20241022",
        "content": [{"type": "text", "text": "from the backup"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 1, "output_tokens": 1}
    });
    let (backup_url, backup) = mock_anthropic(200, reply.clone()).await;

    let proxy = spawn_proxy(&format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: {primary_url}
    max_retries: 0
    fallback_provider: backup
  backup:
    format: anthropic
    base_url: {backup_url}
    max_retries: 0
"#
    ))
    .await;

    let (status, text) = post_messages(&proxy, REQUEST).await;
    assert_eq!(status, 200);
    assert_eq!(serde_json::from_str::<serde_json::Value>(&text).unwrap(), reply);
    assert_eq!(primary.hit_count(), 1, "primary tried exactly once");
    assert_eq!(backup.hit_count(), 1, "fallback tried exactly once");

    // The primary's breaker counted the failure but stayed closed
    // (max_failures defaults to 5), so the next request tries it again.
    post_messages(&proxy, REQUEST).await;
    assert_eq!(primary.hit_count(), 2);
    assert_eq!(backup.hit_count(), 2);
}

#[tokio::test]
async fn fallback_to_other_format_translates() {
    let (primary_url, primary) = mock_anthropic(503, json!({"error": "down"})).await;
    let (backup_url, backup) = mock_openai(
        200,
        json!({
            "id": "chatcmpl-f",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "rescued"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2}
        }),
    )
    .await;

    let proxy = spawn_proxy(&format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: {primary_url}
    max_retries: 0
    fallback_provider: spare
  spare:
    format: openai
    base_url: {backup_url}
    max_retries: 0
"#
    ))
    .await;

    let (status, text) = post_messages(&proxy, REQUEST).await;
    assert_eq!(status, 200);
    let message: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(message["content"][0]["text"], "rescued");
    assert_eq!(message["model"], "claude-3-5-sonnet-20241022");
    assert_eq!(primary.hit_count(), 1);
    assert_eq!(backup.hit_count(), 1);

    // The fallback saw a translated chat-completions body.
    let sent: serde_json::Value =
        serde_json::from_slice(&backup.bodies.lock().unwrap()[0]).unwrap();
    assert_eq!(sent["messages"][0]["role"], "user");
    assert_eq!(sent["messages"][0]["content"], "hi");
}

#[tokio::test]
async fn non_counted_failures_do_not_fall_back() {
    let (primary_url, primary) = mock_anthropic(404, json!({"error": "no such model"})).await;
    let (backup_url, backup) = mock_anthropic(200, json!({"ok": true})).await;

    let proxy = spawn_proxy(&format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: {primary_url}
    max_retries: 0
    fallback_provider: backup
  backup:
    format: anthropic
    base_url: {backup_url}
"#
    ))
    .await;

    let (status, _) = post_messages(&proxy, REQUEST).await;
    assert_eq!(status, 404);
    assert_eq!(primary.hit_count(), 1);
    assert_eq!(backup.hit_count(), 0, "a 404 is the caller's problem, not an outage");
}
