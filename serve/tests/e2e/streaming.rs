//! Streaming translation: chat-completions chunks in, the canonical
//! A-format event sequence out.

use super::common::{client, mock_openai_sse, parse_sse, spawn_proxy};

fn yaml(gemini_url: &str) -> String {
    format!(
        r#"
providers:
  anthropic:
    format: anthropic
    base_url: https://api.anthropic.com
  gemini:
    format: openai
    base_url: {gemini_url}
subagents:
  enable: true
  mappings:
    planner: "gemini:gemini-2.0-flash-exp"
  prompts:
    planner: "You are the planner."
"#
    )
}

const STREAMING_REQUEST: &str = r#"{
  "model": "claude-3-5-sonnet-20241022",
  "messages": [{"role": "user", "content": "say hello"}],
  "system": [
    {"type": "text", "text": "<generic preamble>"},
    {"type": "text", "text": "You are the planner."}
  ],
  "max_tokens": 16,
  "stream": true
}"#;

#[tokio::test]
async fn text_stream_translates_to_canonical_event_order() {
    let (gemini_url, captured) = mock_openai_sse(&[
        r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":4,"completion_tokens":1}}"#,
        "[DONE]",
    ])
    .await;
    let proxy = spawn_proxy(&yaml(&gemini_url)).await;

    let response = client()
        .post(format!("{}/v1/messages", proxy.url))
        .header("content-type", "application/json")
        .body(STREAMING_REQUEST)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .starts_with("text/event-stream"));
    let body = response.text().await.unwrap();
    eprintln!("[e2e] sse body:\n{body}");

    let events = parse_sse(&body);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    let (_, start) = &events[0];
    assert_eq!(start["type"], "message_start");
    assert_eq!(start["message"]["role"], "assistant");
    assert_eq!(start["message"]["model"], "claude-3-5-sonnet-20241022");

    assert_eq!(events[1].1["index"], 0);
    assert_eq!(events[1].1["content_block"]["type"], "text");
    assert_eq!(events[2].1["delta"]["text"], "Hel");
    assert_eq!(events[3].1["delta"]["text"], "lo");
    assert_eq!(events[4].1["index"], 0);

    let (_, delta) = &events[5];
    assert_eq!(delta["delta"]["stop_reason"], "end_turn");
    assert_eq!(delta["usage"]["input_tokens"], 4);
    assert_eq!(delta["usage"]["output_tokens"], 1);

    // No [DONE] sentinel leaks through to the client.
    assert!(!body.contains("[DONE]"));

    // The upstream request asked for usage in the final chunk.
    let sent: serde_json::Value =
        serde_json::from_slice(&captured.bodies.lock().unwrap()[0]).unwrap();
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["stream_options"]["include_usage"], true);
}

#[tokio::test]
async fn tool_call_stream_produces_tool_use_block() {
    let (gemini_url, _captured) = mock_openai_sse(&[
        r#"{"choices":[{"delta":{"content":"Let me check."}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"search","arguments":"{\"q\":"}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"rust\"}"}}]}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        "[DONE]",
    ])
    .await;
    let proxy = spawn_proxy(&yaml(&gemini_url)).await;

    let response = client()
        .post(format!("{}/v1/messages", proxy.url))
        .header("content-type", "application/json")
        .body(STREAMING_REQUEST)
        .send()
        .await
        .unwrap();
    let body = response.text().await.unwrap();
    let events = parse_sse(&body);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",  // text
            "content_block_delta",
            "content_block_stop",
            "content_block_start",  // tool_use
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert_eq!(events[4].1["content_block"]["type"], "tool_use");
    assert_eq!(events[4].1["content_block"]["name"], "search");
    let fragments: String = events
        .iter()
        .filter_map(|(_, value)| value["delta"]["partial_json"].as_str())
        .collect();
    assert_eq!(fragments, r#"{"q":"rust"}"#);
    let (_, delta) = &events[8];
    assert_eq!(delta["delta"]["stop_reason"], "tool_use");
}
