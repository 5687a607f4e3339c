//! The `/v1/messages` orchestrator: parse, route, forward, record, respond.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;

use switchboard::protocol::anthropic::MessagesRequest;
use switchboard::{Error, ForwardRequest, RouteDecision, UpstreamReply};

use crate::app::AppState;
use crate::archive::TransactionRecord;
use crate::error::error_response;

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn archive_record(
    state: &AppState,
    decision: &RouteDecision,
    upstream: &str,
    fallback_used: bool,
    stream: bool,
    outcome: &str,
    status: u16,
    started: Instant,
) {
    let Some(archive) = &state.archive else { return };
    archive.record(&TransactionRecord {
        timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        model: decision.requested_model.clone(),
        target_model: decision.target_model.clone(),
        upstream: upstream.to_string(),
        subagent: decision.subagent.clone(),
        fallback_used,
        stream,
        outcome: outcome.to_string(),
        status,
        latency_ms: started.elapsed().as_millis() as u64,
    });
}

pub(crate) async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let request: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            return error_response(&Error::Validation(format!(
                "malformed request body: {error}"
            )));
        }
    };
    let stream = request.stream;

    let decision = state.router.route(&request);
    tracing::debug!(
        upstream = %decision.upstream,
        target_model = %decision.target_model,
        subagent = decision.subagent.as_deref().unwrap_or("-"),
        stream,
        "routed"
    );

    let forward = ForwardRequest {
        request,
        raw_body: body,
        target_model: decision.target_model.clone(),
        client_api_key: header_string(&headers, "x-api-key"),
        anthropic_version: header_string(&headers, "anthropic-version"),
    };

    let result = match tokio::time::timeout(
        state.request_timeout,
        state.registry.forward_with_fallback(&decision.upstream, &forward),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::UpstreamTransport(
            "request deadline exceeded".to_string(),
        )),
    };

    match result {
        Ok(forwarded) => {
            archive_record(
                &state,
                &decision,
                &forwarded.upstream,
                forwarded.fallback_used,
                stream,
                "ok",
                200,
                started,
            );
            respond(forwarded.reply)
        }
        Err(error) => {
            archive_record(
                &state,
                &decision,
                &decision.upstream,
                false,
                stream,
                error.kind(),
                error.http_status(),
                started,
            );
            error_response(&error)
        }
    }
}

fn respond(reply: UpstreamReply) -> Response {
    match reply {
        UpstreamReply::Body { status, body } => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        UpstreamReply::Translated(message) => {
            (StatusCode::OK, axum::Json(*message)).into_response()
        }
        UpstreamReply::ByteStream(stream) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        UpstreamReply::Events(events) => {
            let stream = events.map(|event| {
                let data = serde_json::to_string(&event).unwrap_or_default();
                Ok::<_, Infallible>(Event::default().event(event.name()).data(data))
            });
            Sse::new(stream)
                .keep_alive(
                    KeepAlive::new()
                        .interval(std::time::Duration::from_secs(15))
                        .event(Event::default().event("ping").data(r#"{"type":"ping"}"#)),
                )
                .into_response()
        }
    }
}
