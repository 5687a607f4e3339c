//! Proxy error taxonomy.
//!
//! One enum covers the request path end to end; each variant knows its wire
//! kind string (used in the protocol-A error envelope) and the HTTP status
//! the edge should answer with.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed inbound request (bad JSON, missing fields).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Malformed JSON in an upstream payload.
    #[error("malformed upstream payload: {0}")]
    TranslationInput(String),

    /// Structurally valid but semantically broken envelope, e.g. a
    /// tool_result referencing an unknown tool_use id.
    #[error("{0}")]
    TranslationSemantic(String),

    /// Connection-level failure talking to the upstream.
    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    /// Upstream answered with a non-2xx status; body retained for the client.
    #[error("upstream returned status {status}")]
    UpstreamHttp { status: u16, body: String },

    /// Fail-fast: the upstream's circuit is open.
    #[error("circuit open for upstream '{0}'")]
    CircuitOpen(String),
}

impl Error {
    /// Wire kind string for the protocol-A error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::TranslationInput(_) => "translation_input_error",
            Error::TranslationSemantic(_) => "translation_semantic_error",
            Error::UpstreamTransport(_) => "upstream_transport_error",
            Error::UpstreamHttp { .. } => "upstream_http_error",
            Error::CircuitOpen(_) => "circuit_open_error",
        }
    }

    /// HTTP status the edge answers with: mirror the upstream status when
    /// there is one, 502 for transport and open circuits, 400 when the
    /// caller is at fault.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::TranslationSemantic(_) => 400,
            Error::TranslationInput(_) => 502,
            Error::UpstreamTransport(_) => 502,
            Error::UpstreamHttp { status, .. } => *status,
            Error::CircuitOpen(_) => 502,
        }
    }
}
