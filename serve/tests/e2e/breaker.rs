//! Breaker: opens after exactly max_failures counted failures, fails fast
//! while open, probes once after the timeout.

use super::common::{mock_anthropic, post_messages, spawn_proxy};
use serde_json::json;
use std::time::Duration;

const REQUEST: &str =
    r#"{"model":"m","messages":[{"role":"user","content":"hi"}],"max_tokens":8}"#;

#[tokio::test]
async fn opens_after_three_failures_and_probes_after_timeout() {
    let (upstream_url, captured) = mock_anthropic(503, json!({"error": "down"})).await;
    let proxy = spawn_proxy(&format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: {upstream_url}
    max_retries: 0
    circuit_breaker:
      max_failures: 3
      timeout: 1
"#
    ))
    .await;

    // Three counted failures, each mirrored to the client.
    for _ in 0..3 {
        let (status, text) = post_messages(&proxy, REQUEST).await;
        assert_eq!(status, 503);
        assert!(text.contains("upstream_http_error"));
    }
    assert_eq!(captured.hit_count(), 3);

    // Fourth call fails fast without touching the upstream.
    let (status, text) = post_messages(&proxy, REQUEST).await;
    assert_eq!(status, 502);
    assert!(text.contains("circuit_open_error"));
    assert_eq!(captured.hit_count(), 3);

    // After the timeout the probe reaches the upstream exactly once.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let (status, _) = post_messages(&proxy, REQUEST).await;
    assert_eq!(status, 503);
    assert_eq!(captured.hit_count(), 4);

    // The failed probe reopened the circuit.
    let (status, _) = post_messages(&proxy, REQUEST).await;
    assert_eq!(status, 502);
    assert_eq!(captured.hit_count(), 4);
}

#[tokio::test]
async fn client_fault_statuses_do_not_trip_the_breaker() {
    let (upstream_url, captured) = mock_anthropic(400, json!({"error": "bad request"})).await;
    let proxy = spawn_proxy(&format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: {upstream_url}
    max_retries: 0
    circuit_breaker:
      max_failures: 1
      timeout: 60
"#
    ))
    .await;

    // With max_failures 1, a single counted failure would open the
    // circuit; 400s keep reaching the upstream.
    for _ in 0..3 {
        let (status, _) = post_messages(&proxy, REQUEST).await;
        assert_eq!(status, 400);
    }
    assert_eq!(captured.hit_count(), 3);
}
