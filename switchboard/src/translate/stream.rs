//! Streaming translation: chat-completions chunks in, messages SSE events out.
//!
//! [`StreamTranslator`] is a pull-one-push-many state machine: feed each
//! inbound chunk to [`process`](StreamTranslator::process), collect the
//! events it returns, and call [`finalize`](StreamTranslator::finalize)
//! once after the `[DONE]` sentinel (or [`fail`](StreamTranslator::fail)
//! on a mid-stream transport error). Content-block events are monotonic by
//! block index and never interleave: one text block streams first, then
//! tool-use blocks in first-seen id order.

use crate::protocol::anthropic::{
    BlockDelta, ContentBlock, ErrorBody, MessageDeltaBody, MessageStart, StreamEvent, Usage,
};
use crate::protocol::openai::{ChatCompletionChunk, ChunkUsage};
use crate::translate::map_finish_reason;

/// One tool call observed on the inbound stream.
struct OpenToolCall {
    id: String,
    /// `tool_calls[].index` on the wire; later deltas for the same call may
    /// omit the id and correlate by this.
    delta_index: u32,
    block_index: usize,
    arguments: String,
    closed: bool,
}

/// Stateful chunk-to-event translator for one streaming response.
pub struct StreamTranslator {
    message_id: String,
    model: String,
    started: bool,
    text_block: Option<usize>,
    text_block_open: bool,
    tool_calls: Vec<OpenToolCall>,
    /// Index into `tool_calls` of the block currently streaming, if any.
    active_tool: Option<usize>,
    next_block_index: usize,
    usage: Option<ChunkUsage>,
    finish_reason: Option<String>,
    done: bool,
}

impl StreamTranslator {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            started: false,
            text_block: None,
            text_block_open: false,
            tool_calls: Vec::new(),
            active_tool: None,
            next_block_index: 0,
            usage: None,
            finish_reason: None,
            done: false,
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<StreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        out.push(StreamEvent::MessageStart {
            message: MessageStart {
                id: self.message_id.clone(),
                kind: "message".to_string(),
                role: "assistant".to_string(),
                model: self.model.clone(),
                content: Vec::new(),
                usage: Usage::default(),
            },
        });
    }

    fn close_text_block(&mut self, out: &mut Vec<StreamEvent>) {
        if self.text_block_open {
            if let Some(index) = self.text_block {
                out.push(StreamEvent::ContentBlockStop { index });
            }
            self.text_block_open = false;
        }
    }

    fn close_active_tool(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some(slot) = self.active_tool.take() {
            let call = &mut self.tool_calls[slot];
            call.closed = true;
            out.push(StreamEvent::ContentBlockStop {
                index: call.block_index,
            });
        }
    }

    fn handle_text(&mut self, text: &str, out: &mut Vec<StreamEvent>) {
        // Role-priming chunks carry an empty content string; they do not
        // open a block.
        if text.is_empty() {
            return;
        }
        if !self.text_block_open {
            let index = self.next_block_index;
            self.next_block_index += 1;
            self.text_block = Some(index);
            self.text_block_open = true;
            out.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::text(""),
            });
        }
        out.push(StreamEvent::ContentBlockDelta {
            index: self.text_block.expect("text block index set when open"),
            delta: BlockDelta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn handle_tool_delta(
        &mut self,
        id: Option<&str>,
        delta_index: u32,
        name: Option<&str>,
        arguments: Option<&str>,
        out: &mut Vec<StreamEvent>,
    ) {
        let slot = match id {
            Some(id) => self.tool_calls.iter().position(|call| call.id == id),
            // Id-less continuation deltas correlate by wire index.
            None => self
                .tool_calls
                .iter()
                .rposition(|call| call.delta_index == delta_index),
        };

        let slot = match slot {
            Some(slot) => slot,
            None => {
                let Some(id) = id else {
                    // A continuation for a call we never saw start; nothing
                    // to attach it to.
                    tracing::debug!(delta_index, "dropping tool-call delta with no open call");
                    return;
                };
                // New id: the previous block is no longer active.
                self.close_text_block(out);
                self.close_active_tool(out);
                let block_index = self.next_block_index;
                self.next_block_index += 1;
                self.tool_calls.push(OpenToolCall {
                    id: id.to_string(),
                    delta_index,
                    block_index,
                    arguments: String::new(),
                    closed: false,
                });
                let slot = self.tool_calls.len() - 1;
                self.active_tool = Some(slot);
                out.push(StreamEvent::ContentBlockStart {
                    index: block_index,
                    content_block: ContentBlock::ToolUse {
                        id: id.to_string(),
                        name: name.unwrap_or_default().to_string(),
                        input: serde_json::json!({}),
                    },
                });
                slot
            }
        };

        if let Some(fragment) = arguments {
            if fragment.is_empty() {
                return;
            }
            let call = &mut self.tool_calls[slot];
            call.arguments.push_str(fragment);
            if call.closed {
                // Late fragment for a block that already stopped; blocks
                // never reopen, so it only reaches the accumulated buffer.
                tracing::debug!(id = %call.id, "tool-call fragment after block stop");
                return;
            }
            let index = call.block_index;
            out.push(StreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: fragment.to_string(),
                },
            });
        }
    }

    /// Feeds one inbound chunk, returning the events it produces (possibly
    /// none). Chunks arriving after [`finalize`]/[`fail`] are ignored.
    pub fn process(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.ensure_started(&mut out);

        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(text) = choice.delta.content.as_deref() {
            self.handle_text(text, &mut out);
        }

        if let Some(tool_calls) = choice.delta.tool_calls.as_ref() {
            if !tool_calls.is_empty() {
                self.close_text_block(&mut out);
            }
            for call in tool_calls {
                self.handle_tool_delta(
                    call.id.as_deref(),
                    call.index,
                    call.function.as_ref().and_then(|f| f.name.as_deref()),
                    call.function.as_ref().and_then(|f| f.arguments.as_deref()),
                    &mut out,
                );
            }
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            self.finish_reason = Some(reason.to_string());
        }

        out
    }

    fn trailer(&mut self, error: Option<ErrorBody>, out: &mut Vec<StreamEvent>) {
        self.close_text_block(out);
        self.close_active_tool(out);
        let usage = self
            .usage
            .take()
            .map(|usage| Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })
            .unwrap_or_default();
        out.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(map_finish_reason(self.finish_reason.as_deref()).to_string()),
                stop_sequence: None,
            },
            usage,
            error,
        });
        out.push(StreamEvent::MessageStop);
    }

    /// Closes the stream after the `[DONE]` sentinel: stops any open block,
    /// then emits exactly one `message_delta` (stop reason + usage, zeros
    /// when the upstream never sent usage) and one `message_stop`.
    pub fn finalize(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.done = true;
        self.ensure_started(&mut out);
        self.trailer(None, &mut out);
        out
    }

    /// Terminates the stream after a mid-stream failure: same trailer shape
    /// as [`finalize`] but with stop reason `end_turn`, zero usage, and an
    /// error annotation on the `message_delta`.
    pub fn fail(&mut self, kind: &str, message: &str) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.done = true;
        self.ensure_started(&mut out);
        self.usage = None;
        self.finish_reason = None;
        self.trailer(
            Some(ErrorBody {
                kind: kind.to_string(),
                message: message.to_string(),
            }),
            &mut out,
        );
        out
    }
}
