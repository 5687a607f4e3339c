//! Routing: which upstream and which model serve a request.
//!
//! Subagent routing keys on a fingerprint of the *static portion* of the
//! system prompt: with `system` as a block sequence of length ≥ 2, the
//! first block is the host preamble shared by every invocation and is
//! ignored; the SHA-256 of the newline-joined text of the remaining blocks
//! identifies the subagent. The registry is built at startup by hashing
//! each configured subagent prompt with the same function. Routing is a
//! pure function of the request and never fails: a miss falls through to
//! the default upstream with the model unchanged.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::protocol::anthropic::{ContentBlock, MessagesRequest, SystemPrompt};

/// Target of one subagent rule.
#[derive(Debug, Clone)]
pub struct SubagentRoute {
    pub upstream: String,
    pub model: String,
    pub label: String,
}

/// Outcome of routing one request.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// Name of the selected upstream.
    pub upstream: String,
    /// Model as the client sent it.
    pub requested_model: String,
    /// Model the upstream should see.
    pub target_model: String,
    /// Matched subagent label, if any.
    pub subagent: Option<String>,
}

/// Splits a `upstream:model` mapping value on the first colon only, so the
/// model part may itself contain colons (`gemini/gemini-2.0-flash-exp` or
/// provider-prefixed names).
pub fn split_target(target: &str) -> Option<(&str, &str)> {
    let (upstream, model) = target.split_once(':')?;
    if upstream.is_empty() || model.is_empty() {
        return None;
    }
    Some((upstream, model))
}

/// Lowercased hex SHA-256 of the given text.
pub fn fingerprint_text(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Fingerprint of a request's system prompt, when one is defined: block
/// form with at least two blocks, hashing the text of everything after the
/// first block.
pub fn fingerprint_system(system: &SystemPrompt) -> Option<String> {
    let blocks = match system {
        SystemPrompt::Text(_) => return None,
        SystemPrompt::Blocks(blocks) => blocks,
    };
    if blocks.len() < 2 {
        return None;
    }
    let static_portion = blocks[1..]
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(fingerprint_text(&static_portion))
}

/// Fingerprint-keyed subagent registry plus the default decision.
pub struct Router {
    enabled: bool,
    default_upstream: String,
    by_fingerprint: HashMap<String, SubagentRoute>,
}

impl Router {
    /// Builds the router. `routes` pairs each subagent rule with its
    /// configured prompt text; the registry hashes the prompt exactly the
    /// way request fingerprints are computed.
    pub fn new(
        default_upstream: impl Into<String>,
        enabled: bool,
        routes: impl IntoIterator<Item = (String, SubagentRoute)>,
    ) -> Self {
        let by_fingerprint = routes
            .into_iter()
            .map(|(prompt, route)| (fingerprint_text(&prompt), route))
            .collect();
        Self {
            enabled,
            default_upstream: default_upstream.into(),
            by_fingerprint,
        }
    }

    fn default_decision(&self, request: &MessagesRequest) -> RouteDecision {
        RouteDecision {
            upstream: self.default_upstream.clone(),
            requested_model: request.model.clone(),
            target_model: request.model.clone(),
            subagent: None,
        }
    }

    /// Selects the upstream and target model for one request. Identical
    /// inputs produce identical decisions; lookup misses fall through to
    /// the default silently.
    pub fn route(&self, request: &MessagesRequest) -> RouteDecision {
        if !self.enabled {
            return self.default_decision(request);
        }
        let Some(fingerprint) = request.system.as_ref().and_then(fingerprint_system) else {
            return self.default_decision(request);
        };
        match self.by_fingerprint.get(&fingerprint) {
            Some(route) => {
                tracing::debug!(
                    subagent = %route.label,
                    upstream = %route.upstream,
                    model = %route.model,
                    "subagent fingerprint matched"
                );
                RouteDecision {
                    upstream: route.upstream.clone(),
                    requested_model: request.model.clone(),
                    target_model: route.model.clone(),
                    subagent: Some(route.label.clone()),
                }
            }
            None => self.default_decision(request),
        }
    }
}
