//! Switchboard binary: load config, open the catalogue, start the indexer
//! and watcher, bind, serve.
//!
//! Usage: `switchboard [config.yaml]`; the path may also come from
//! `$SWITCHBOARD_CONFIG` (default `switchboard.yaml`).
//!
//! Exit codes: 0 clean shutdown, 1 configuration validation failure,
//! 2 catalogue-store initialisation failure, 3 listener bind failure.

use std::sync::Arc;

use catalog::store::Store;
use catalog::Catalog;
use config::Config;
use serve::{build_state, run_serve_on_listener, Archive};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SWITCHBOARD_CONFIG").ok())
        .unwrap_or_else(|| "switchboard.yaml".to_string());

    let config = match Config::from_yaml_file(&config_path) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(path = %config_path, %error, "configuration invalid");
            std::process::exit(1);
        }
    };

    let catalog_path = config::expand_home(&config.storage.catalog_path);
    let store = match Store::open(&catalog_path) {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(path = %catalog_path.display(), %error, "catalogue init failed");
            std::process::exit(2);
        }
    };
    let root = config::expand_home(&config.storage.conversations_root);
    let catalog = Arc::new(Catalog::new(store, root, config.storage.max_fts_text));

    // Startup walk runs in the background; the proxy does not wait for it.
    {
        let catalog = catalog.clone();
        tokio::spawn(async move {
            catalog.index_all().await;
        });
    }
    // A dead watcher disables live re-indexing but not the proxy.
    let watcher = match catalog::watch::spawn(catalog.clone()) {
        Ok(handle) => Some(handle),
        Err(error) => {
            tracing::error!(%error, "watcher failed to start; live re-indexing disabled");
            None
        }
    };

    let archive = match &config.storage.archive_path {
        Some(path) => match Archive::open(config::expand_home(path)).await {
            Ok(archive) => Some(archive),
            Err(error) => {
                tracing::warn!(%error, "archive log unavailable; transactions not recorded");
                None
            }
        },
        None => None,
    };

    let state = Arc::new(build_state(&config, catalog, archive));

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%addr, %error, "listener bind failed");
            std::process::exit(3);
        }
    };

    let result = run_serve_on_listener(listener, state).await;
    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    if let Err(error) = result {
        tracing::error!(%error, "server terminated with error");
        std::process::exit(3);
    }
}
