//! Wire-format DTOs for both chat protocols.
//!
//! - [`anthropic`]: the messages protocol (typed content blocks,
//!   tool_use/tool_result pairing, SSE event grammar). This is the format
//!   clients speak and the format the proxy always answers in.
//! - [`openai`]: the chat-completions protocol (flat text content,
//!   `tool_calls` on assistant messages, `tool` role for results, chunked
//!   SSE terminated by a `[DONE]` sentinel).

pub mod anthropic;
pub mod openai;
