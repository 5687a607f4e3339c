//! Wire-format translation between the messages protocol and the
//! chat-completions protocol.
//!
//! Non-streaming directions live here; the streaming state machine is in
//! [`stream`]. Translation is lossy only where the formats cannot express
//! the same thing (image blocks, non-text system blocks); everything that
//! both formats can carry survives a round trip.

pub mod stream;

use serde_json::Value;

use crate::error::Error;
use crate::protocol::anthropic::{
    ContentBlock, MessagesRequest, MessagesResponse, SystemPrompt, ToolResultContent, Usage,
};
use crate::protocol::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, FunctionCall, FunctionDef,
    StreamOptions, ToolCall, ToolSpec,
};

/// Chat-completions validators reject null/empty content; a single space is
/// the conventional stand-in.
fn non_empty(text: String) -> String {
    if text.is_empty() {
        " ".to_string()
    } else {
        text
    }
}

/// Models named `o<digit>...` reject the temperature parameter outright.
fn rejects_temperature(model: &str) -> bool {
    let bytes = model.as_bytes();
    bytes.len() >= 2 && bytes[0] == b'o' && bytes[1].is_ascii_digit()
}

/// Newline-joined text of the `text` blocks in a block sequence. Non-text
/// blocks are dropped.
fn join_text_blocks(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flattens tool-result content to the single string a `tool` message
/// carries: strings pass through, block sequences concatenate their text,
/// anything else serialises as compact JSON.
fn flatten_tool_result(content: Option<&ToolResultContent>) -> String {
    match content {
        None => String::new(),
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => join_text_blocks(blocks),
        Some(ToolResultContent::Other(value)) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// Synthesises `items: {"type":"string"}` for array-typed schema nodes that
/// lack one (strict chat-completions validators require it), recursing
/// through `properties` and `items`.
fn patch_array_items(schema: &mut Value) {
    let Some(object) = schema.as_object_mut() else { return };
    let is_array = object.get("type").and_then(Value::as_str) == Some("array");
    if is_array && !object.contains_key("items") {
        object.insert(
            "items".to_string(),
            serde_json::json!({ "type": "string" }),
        );
    }
    if let Some(items) = object.get_mut("items") {
        patch_array_items(items);
    }
    if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
        for property in properties.values_mut() {
            patch_array_items(property);
        }
    }
}

/// Translates a messages request into a chat-completions request targeting
/// `target_model`.
///
/// # Errors
///
/// `TranslationSemantic` when a `tool_result` references a `tool_use` id
/// that no prior assistant message introduced.
pub fn request_a_to_b(
    request: &MessagesRequest,
    target_model: &str,
) -> Result<ChatCompletionRequest, Error> {
    let mut messages = Vec::new();

    match &request.system {
        None => {}
        Some(SystemPrompt::Text(text)) => {
            messages.push(ChatMessage::text("system", non_empty(text.clone())));
        }
        Some(SystemPrompt::Blocks(blocks)) => {
            messages.push(ChatMessage::text(
                "system",
                non_empty(join_text_blocks(blocks)),
            ));
        }
    }

    let mut known_tool_use_ids: Vec<String> = Vec::new();

    for turn in &request.messages {
        match turn.role.as_str() {
            "assistant" => {
                let (content, tool_calls) = match &turn.content {
                    crate::protocol::anthropic::MessageContent::Text(text) => {
                        (non_empty(text.clone()), Vec::new())
                    }
                    crate::protocol::anthropic::MessageContent::Blocks(blocks) => {
                        let mut tool_calls = Vec::new();
                        for block in blocks {
                            if let ContentBlock::ToolUse { id, name, input } = block {
                                known_tool_use_ids.push(id.clone());
                                tool_calls.push(ToolCall {
                                    id: id.clone(),
                                    kind: "function".to_string(),
                                    function: FunctionCall {
                                        name: name.clone(),
                                        arguments: serde_json::to_string(input)
                                            .unwrap_or_else(|_| "{}".to_string()),
                                    },
                                });
                            }
                        }
                        (non_empty(join_text_blocks(blocks)), tool_calls)
                    }
                };
                messages.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: Some(content),
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                    tool_call_id: None,
                });
            }
            // Everything else maps as a user-side turn; tool results inside
            // it become dedicated `tool` messages in block order.
            _ => {
                let blocks = match &turn.content {
                    crate::protocol::anthropic::MessageContent::Text(text) => {
                        messages.push(ChatMessage::text(turn.role.clone(), non_empty(text.clone())));
                        continue;
                    }
                    crate::protocol::anthropic::MessageContent::Blocks(blocks) => blocks,
                };
                let mut text_parts: Vec<&str> = Vec::new();
                let mut emitted_tool_message = false;
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => text_parts.push(text),
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => {
                            if !known_tool_use_ids.iter().any(|id| id == tool_use_id) {
                                return Err(Error::TranslationSemantic(format!(
                                    "tool_result references unknown tool_use id '{tool_use_id}'"
                                )));
                            }
                            messages.push(ChatMessage {
                                role: "tool".to_string(),
                                content: Some(non_empty(flatten_tool_result(content.as_ref()))),
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id.clone()),
                            });
                            emitted_tool_message = true;
                        }
                        // Flat-text upstreams cannot carry these; dropped.
                        ContentBlock::ToolUse { .. } | ContentBlock::Image { .. } => {}
                    }
                }
                if !text_parts.is_empty() || !emitted_tool_message {
                    messages.push(ChatMessage::text(
                        turn.role.clone(),
                        non_empty(text_parts.join("\n")),
                    ));
                }
            }
        }
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| {
                let mut parameters = tool.input_schema.clone();
                patch_array_items(&mut parameters);
                ToolSpec {
                    kind: "function".to_string(),
                    function: FunctionDef {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters,
                    },
                }
            })
            .collect::<Vec<_>>()
    });

    Ok(ChatCompletionRequest {
        model: target_model.to_string(),
        messages,
        tools,
        max_tokens: request.max_tokens,
        temperature: if rejects_temperature(target_model) {
            None
        } else {
            request.temperature
        },
        top_p: request.top_p,
        stop: request.stop_sequences.clone(),
        stream: request.stream,
        stream_options: request.stream.then(|| StreamOptions {
            include_usage: true,
        }),
    })
}

/// Maps a chat-completions finish reason to a messages stop reason.
pub fn map_finish_reason(finish_reason: Option<&str>) -> &'static str {
    match finish_reason {
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        Some("content_filter") => "stop_sequence",
        _ => "end_turn",
    }
}

/// Best-effort parse of a tool-call arguments string; failures wrap the raw
/// string so nothing is lost.
pub fn parse_tool_arguments(arguments: &str) -> Value {
    serde_json::from_str(arguments)
        .unwrap_or_else(|_| serde_json::json!({ "raw": arguments }))
}

/// Translates a chat-completions response into a messages response echoing
/// `model` (the name the client asked for).
///
/// # Errors
///
/// `TranslationInput` when the response carries no choices.
pub fn response_b_to_a(
    response: &ChatCompletionResponse,
    model: &str,
) -> Result<MessagesResponse, Error> {
    let choice = response
        .choices
        .first()
        .ok_or_else(|| Error::TranslationInput("response has no choices".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.as_deref() {
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
    }
    if let Some(tool_calls) = choice.message.tool_calls.as_ref() {
        for call in tool_calls {
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: parse_tool_arguments(&call.function.arguments),
            });
        }
    }

    let usage = response
        .usage
        .as_ref()
        .map(|usage| Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
        .unwrap_or_default();

    Ok(MessagesResponse {
        id: response
            .id
            .clone()
            .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple())),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content,
        stop_reason: Some(map_finish_reason(choice.finish_reason.as_deref()).to_string()),
        stop_sequence: None,
        usage,
    })
}
