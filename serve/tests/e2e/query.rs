//! Read-only query endpoints over the catalogue.

use super::common::{client, spawn_proxy};

const YAML: &str = r#"
providers:
  anthropic:
    format: anthropic
    base_url: https://api.anthropic.com
"#;

const SESSION: &str = concat!(
    r#"{"uuid":"u1","type":"user","timestamp":"2024-05-01T10:00:00Z","sessionId":"s1","message":{"content":[{"type":"text","text":"please refactor the parser"}]}}"#,
    "\n",
    r#"{"uuid":"u2","type":"assistant","timestamp":"2024-05-01T10:00:08Z","parentUuid":"u1","message":{"content":[{"type":"text","text":"refactoring now"},{"type":"tool_use","id":"t1","name":"edit_file","input":{}}]}}"#,
);

#[tokio::test]
async fn conversations_and_search_serve_indexed_data() {
    let proxy = spawn_proxy(YAML).await;
    let project = proxy.projects_dir().join("-home-dev-parser");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(project.join("session-1.jsonl"), SESSION).unwrap();

    let report = proxy.catalog.index_all().await;
    assert_eq!(report.indexed, 1);

    let rows: serde_json::Value = client()
        .get(format!("{}/api/conversations", proxy.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["project_label"], "-home-dev-parser");
    assert_eq!(rows[0]["message_count"], 2);

    // Porter stemming: "refactored" matches "refactoring".
    let hits: serde_json::Value = client()
        .get(format!("{}/api/search?q=refactored", proxy.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 2);

    let stats: serde_json::Value = client()
        .get(format!("{}/api/stats", proxy.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["conversations"], 1);
    assert_eq!(stats["messages"], 2);
    assert_eq!(stats["fts_rows"], 2);
}

#[tokio::test]
async fn empty_catalogue_serves_empty_lists() {
    let proxy = spawn_proxy(YAML).await;
    let rows: serde_json::Value = client()
        .get(format!("{}/api/conversations", proxy.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows, serde_json::json!([]));

    let hits: serde_json::Value = client()
        .get(format!("{}/api/search?q=anything", proxy.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hits, serde_json::json!([]));
}
