//! Read-only query endpoints over the conversation catalogue.
//!
//! These borrow a read handle; the indexer stays the only writer (WAL
//! keeps the two isolated).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::error::store_error_response;

pub(crate) async fn conversations(State(state): State<Arc<AppState>>) -> Response {
    match state.catalog.conversations().await {
        Ok(rows) => Json(rows).into_response(),
        Err(error) => store_error_response(&error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub(crate) async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Response {
    match state.catalog.search(&params.q, params.limit.min(500)).await {
        Ok(hits) => Json(hits).into_response(),
        Err(error) => store_error_response(&error),
    }
}

pub(crate) async fn stats(State(state): State<Arc<AppState>>) -> Response {
    match state.catalog.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(error) => store_error_response(&error),
    }
}
