//! Conversation log parsing.
//!
//! Each `*.jsonl` file is one session: one JSON object per line, with at
//! minimum `uuid` and `timestamp`. The parser is deliberately forgiving:
//! malformed lines are skipped and counted, lines without a `uuid` are
//! metadata rather than indexable messages, and timestamps are accepted in
//! both fractional- and whole-second RFC 3339 form.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::CatalogError;

/// One line of a conversation file, as written by the client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogLine {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    parent_uuid: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    is_sidechain: bool,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    git_branch: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: Option<Value>,
}

/// A message ready for catalogue insertion.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub is_sidechain: bool,
    pub model: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_creation_tokens: i64,
    pub content_json: Option<String>,
    pub tool_use_json: Option<String>,
    pub tool_result_json: Option<String>,
    /// Space-joined text of the content's text blocks, truncated for FTS.
    pub text: String,
    /// Space-joined names of the tool_use blocks in this message.
    pub tool_names: String,
}

/// Result of parsing one file.
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub messages: Vec<ParsedMessage>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Lines that failed to parse (logged and skipped).
    pub skipped_lines: usize,
}

/// Accepts `2024-05-01T10:00:00Z` and `2024-05-01T10:00:00.123Z` alike,
/// with or without a numeric offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn truncate_chars(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        text
    } else {
        text.chars().take(max).collect()
    }
}

/// Pulls the FTS text, tool names, and raw JSON slices out of the
/// `message` object.
fn extract_message(message: &Value, max_text: usize) -> (String, String, Option<String>, Option<String>, Option<String>) {
    let content = message.get("content");
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_names: Vec<String> = Vec::new();
    let mut tool_uses: Vec<&Value> = Vec::new();
    let mut tool_results: Vec<&Value> = Vec::new();

    match content {
        Some(Value::String(text)) => text_parts.push(text.clone()),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            text_parts.push(text.to_string());
                        }
                    }
                    Some("tool_use") => {
                        if let Some(name) = block.get("name").and_then(Value::as_str) {
                            tool_names.push(name.to_string());
                        }
                        tool_uses.push(block);
                    }
                    Some("tool_result") => tool_results.push(block),
                    _ => {}
                }
            }
        }
        _ => {}
    }

    let text = truncate_chars(text_parts.join(" "), max_text);
    let tool_names = tool_names.join(" ");
    let content_json = content.map(|value| value.to_string());
    let tool_use_json = (!tool_uses.is_empty()).then(|| {
        serde_json::to_string(&tool_uses).unwrap_or_default()
    });
    let tool_result_json = (!tool_results.is_empty()).then(|| {
        serde_json::to_string(&tool_results).unwrap_or_default()
    });
    (text, tool_names, content_json, tool_use_json, tool_result_json)
}

/// Parses one conversation file. I/O errors fail the file; bad lines only
/// bump `skipped_lines`.
pub fn parse_file(path: &Path, max_text: usize) -> Result<ParsedFile, CatalogError> {
    let raw = std::fs::read_to_string(path)?;
    let mut parsed = ParsedFile::default();

    for (line_number, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line: LogLine = match serde_json::from_str(line) {
            Ok(line) => line,
            Err(error) => {
                tracing::debug!(
                    path = %path.display(),
                    line = line_number + 1,
                    %error,
                    "skipping malformed conversation line"
                );
                parsed.skipped_lines += 1;
                continue;
            }
        };

        let timestamp = line.timestamp.as_deref().and_then(parse_timestamp);
        if let Some(ts) = timestamp {
            parsed.start_time = Some(parsed.start_time.map_or(ts, |s| s.min(ts)));
            parsed.end_time = Some(parsed.end_time.map_or(ts, |e| e.max(ts)));
        }

        // No uuid: metadata, not an indexable message.
        let Some(id) = line.uuid.filter(|id| !id.is_empty()) else {
            continue;
        };

        let kind = match line.kind.as_deref() {
            Some("user") => "user",
            Some("assistant") => "assistant",
            _ => "metadata",
        }
        .to_string();

        let (text, tool_names, content_json, tool_use_json, tool_result_json) = line
            .message
            .as_ref()
            .map(|message| extract_message(message, max_text))
            .unwrap_or((String::new(), String::new(), None, None, None));

        let usage = line.message.as_ref().and_then(|m| m.get("usage"));
        let token = |key: &str| -> i64 {
            usage
                .and_then(|u| u.get(key))
                .and_then(Value::as_i64)
                .unwrap_or(0)
        };

        parsed.messages.push(ParsedMessage {
            id,
            parent_id: line.parent_uuid,
            kind,
            timestamp,
            cwd: line.cwd,
            git_branch: line.git_branch,
            session_id: line.session_id,
            agent_id: line.agent_id,
            is_sidechain: line.is_sidechain,
            model: line
                .message
                .as_ref()
                .and_then(|m| m.get("model"))
                .and_then(Value::as_str)
                .map(str::to_string),
            input_tokens: token("input_tokens"),
            output_tokens: token("output_tokens"),
            cache_read_tokens: token("cache_read_input_tokens"),
            cache_creation_tokens: token("cache_creation_input_tokens"),
            content_json,
            tool_use_json,
            tool_result_json,
            text,
            tool_names,
        });
    }

    Ok(parsed)
}
