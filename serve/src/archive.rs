//! Append-only transaction log.
//!
//! One compact JSON line per proxied request: when, what the router
//! decided, who served it, how it went. Writes go through a channel to a
//! single appender task so the hot path never blocks on disk; a full queue
//! or a write failure is logged and dropped, never surfaced to the client.

use std::path::Path;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// One archived transaction.
#[derive(Debug, Serialize)]
pub struct TransactionRecord {
    pub timestamp: String,
    /// Model the client asked for.
    pub model: String,
    /// Model the upstream saw.
    pub target_model: String,
    /// Upstream that actually served the request.
    pub upstream: String,
    pub subagent: Option<String>,
    pub fallback_used: bool,
    pub stream: bool,
    /// "ok" or the error kind.
    pub outcome: String,
    pub status: u16,
    pub latency_ms: u64,
}

#[derive(Clone)]
pub struct Archive {
    tx: mpsc::UnboundedSender<String>,
}

impl Archive {
    /// Opens (appending) the log file and starts the writer task.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(error) = file.write_all(line.as_bytes()).await {
                    tracing::warn!(%error, "archive write failed");
                }
            }
            let _ = file.flush().await;
        });
        Ok(Self { tx })
    }

    pub fn record(&self, record: &TransactionRecord) {
        match serde_json::to_string(record) {
            Ok(mut line) => {
                line.push('\n');
                let _ = self.tx.send(line);
            }
            Err(error) => tracing::warn!(%error, "archive record serialization failed"),
        }
    }
}
