//! # Switchboard core
//!
//! A transparent reverse proxy core for LLM chat APIs: clients speak the
//! Anthropic messages protocol; upstreams speak either that protocol or
//! OpenAI chat completions. This crate is the protocol-and-policy layer;
//! the HTTP edge lives in the `serve` crate, the conversation catalogue in
//! `catalog`.
//!
//! ## Main modules
//!
//! - [`protocol`]: DTOs for both wire formats, including the A-format SSE
//!   event grammar ([`protocol::anthropic::StreamEvent`]).
//! - [`translate`]: request A→B, response B→A, and the streaming state
//!   machine ([`translate::stream::StreamTranslator`]).
//! - [`route`]: subagent fingerprint routing ([`Router`], [`RouteDecision`]).
//! - [`breaker`]: three-state circuit breaker ([`CircuitBreaker`]).
//! - [`upstream`]: per-provider clients with retry, fallback, and format
//!   translation ([`Upstream`], [`UpstreamRegistry`]).
//! - [`error`]: the proxy error taxonomy ([`Error`]).

pub mod breaker;
pub mod error;
pub mod protocol;
pub mod route;
pub mod translate;
pub mod upstream;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use error::Error;
pub use route::{RouteDecision, Router, SubagentRoute};
pub use upstream::{
    ForwardRequest, ForwardResult, Upstream, UpstreamConfig, UpstreamRegistry, UpstreamReply,
    WireFormat,
};
