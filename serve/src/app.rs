//! Axum app: state, config-to-registry wiring, and the route table.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;

use catalog::Catalog;
use config::{Config, ProviderFormat};
use switchboard::{
    BreakerConfig, Router as SubagentRouter, SubagentRoute, UpstreamConfig, UpstreamRegistry,
    WireFormat,
};

use crate::archive::Archive;
use crate::{messages, query};

/// Shared per-process state. Read-only after startup; the breakers inside
/// the registry are the only mutable surface.
pub struct AppState {
    pub registry: UpstreamRegistry,
    pub router: SubagentRouter,
    pub catalog: Arc<Catalog>,
    pub archive: Option<Archive>,
    pub request_timeout: Duration,
}

/// Builds the upstream registry and subagent router from validated config.
pub fn build_state(config: &Config, catalog: Arc<Catalog>, archive: Option<Archive>) -> AppState {
    let registry = UpstreamRegistry::new(config.providers.iter().map(|(name, provider)| {
        UpstreamConfig {
            name: name.clone(),
            format: match provider.format {
                ProviderFormat::Anthropic => WireFormat::Anthropic,
                ProviderFormat::Openai => WireFormat::OpenAi,
            },
            base_url: provider.base_url.clone(),
            api_key: provider.api_key.clone(),
            max_retries: provider.max_retries,
            breaker: BreakerConfig {
                max_failures: provider.circuit_breaker.max_failures,
                timeout: Duration::from_secs(provider.circuit_breaker.timeout),
                enabled: provider.circuit_breaker.enabled,
            },
            fallback: provider.fallback_provider.clone(),
        }
    }));

    // Validation guarantees an anthropic-format provider exists.
    let default_provider = config
        .default_provider()
        .expect("validated config has an anthropic-format provider")
        .to_string();
    let routes = config.subagents.mappings.iter().filter_map(|(label, target)| {
        let (upstream, model) = switchboard::route::split_target(target)?;
        let prompt = config.subagents.prompts.get(label)?;
        Some((
            prompt.clone(),
            SubagentRoute {
                upstream: upstream.to_string(),
                model: model.to_string(),
                label: label.clone(),
            },
        ))
    });
    let router = SubagentRouter::new(default_provider, config.subagents.enable, routes);

    AppState {
        registry,
        router,
        catalog,
        archive,
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages::handle))
        .route("/api/conversations", get(query::conversations))
        .route("/api/search", get(query::search))
        .route("/api/stats", get(query::stats))
        .with_state(state)
}
