//! Protocol-A error envelope rendering.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use switchboard::protocol::anthropic::ErrorEnvelope;
use switchboard::Error;

/// Renders a proxy error as `{"type":"error","error":{...}}`: mirror the
/// upstream status when there is one, 502 for transport and open circuits,
/// 400 when the caller is at fault.
pub fn error_response(error: &Error) -> Response {
    let message = match error {
        // The upstream body is usually its own error payload; prefer it.
        Error::UpstreamHttp { body, .. } if !body.trim().is_empty() => body.clone(),
        other => other.to_string(),
    };
    let envelope = ErrorEnvelope::new(error.kind(), message);
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&envelope).unwrap_or_else(|_| {
            r#"{"type":"error","error":{"type":"upstream_transport_error","message":"error"}}"#
                .to_string()
        }),
    )
        .into_response()
}

/// Catalogue read failures on the query endpoints: a plain 500 envelope.
/// Indexer-side errors themselves never surface here.
pub fn store_error_response(error: &catalog::CatalogError) -> Response {
    let envelope = ErrorEnvelope::new("indexer_store_error", error.to_string());
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&envelope).unwrap_or_default(),
    )
        .into_response()
}
