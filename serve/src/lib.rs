//! HTTP edge for Switchboard (axum).
//!
//! One proxy endpoint (`POST /v1/messages`) plus read-only catalogue
//! queries (`GET /api/conversations`, `GET /api/search`, `GET /api/stats`).
//!
//! **Public API**: [`build_state`], [`run_serve`], [`run_serve_on_listener`].

mod app;
mod archive;
mod error;
mod messages;
mod query;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

pub use app::{build_state, router, AppState};
pub use archive::{Archive, TransactionRecord};

/// Serves on an existing listener. Tests bind to `127.0.0.1:0` and pass the
/// listener in.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("switchboard listening on http://{}", addr);
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

/// Binds `addr` and serves until interrupted.
pub async fn run_serve(
    addr: &str,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, state).await
}
