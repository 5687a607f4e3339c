//! # Conversation catalogue
//!
//! Discovers append-only `*.jsonl` conversation logs under a root
//! directory, parses them, and maintains a searchable SQLite catalogue
//! (relational tables plus an FTS5 index). Indexing is idempotent and
//! mtime-gated: an unchanged file is skipped, a changed file is replaced
//! wholesale inside one transaction. A filesystem watcher debounces change
//! events per path and a single worker serialises the resulting writes.
//!
//! The catalogue is read-only with respect to the log files and never
//! deletes its own rows except through [`Catalog::reset`].

pub mod parse;
pub mod store;
pub mod watch;

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

use store::{ConversationRecord, SearchHit, Store, StoreStats};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalogue store: {0}")]
    Store(String),
    #[error("read conversation file: {0}")]
    Io(#[from] std::io::Error),
    #[error("watcher: {0}")]
    Watch(String),
}

impl From<rusqlite::Error> for CatalogError {
    fn from(error: rusqlite::Error) -> Self {
        CatalogError::Store(error.to_string())
    }
}

/// What one [`Catalog::index_file`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// File was parsed and its rows replaced.
    Indexed { messages: usize },
    /// Stored mtime is current; nothing written.
    Skipped,
}

/// Summary of one full indexing pass. Per-file failures land in `errors`
/// and never abort the walk.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped: usize,
    pub errors: Vec<(PathBuf, String)>,
}

/// Stable conversation id: a 16-hex-char prefix of the SHA-256 of the file
/// path, so re-discovery of the same file always lands on the same row.
pub fn conversation_id(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

fn is_jsonl(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("jsonl")
}

/// The indexer service. Owns the store handle; the query layer borrows it
/// through the read methods here.
pub struct Catalog {
    store: Store,
    root: PathBuf,
    max_fts_text: usize,
}

impl Catalog {
    pub fn new(store: Store, root: impl Into<PathBuf>, max_fts_text: usize) -> Self {
        Self {
            store,
            root: root.into(),
            max_fts_text,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the root and indexes every `*.jsonl` file that is new or has a
    /// newer mtime than its stored row.
    pub async fn index_all(&self) -> IndexReport {
        let root = self.root.clone();
        let paths = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_jsonl(path))
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        let mut report = IndexReport::default();
        for path in paths {
            match self.index_file(&path).await {
                Ok(IndexOutcome::Indexed { .. }) => report.indexed += 1,
                Ok(IndexOutcome::Skipped) => report.skipped += 1,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "indexing failed");
                    report.errors.push((path, error.to_string()));
                }
            }
        }
        tracing::info!(
            indexed = report.indexed,
            skipped = report.skipped,
            errors = report.errors.len(),
            "indexing pass complete"
        );
        report
    }

    /// Indexes one file if its mtime moved past the stored row.
    pub async fn index_file(&self, path: &Path) -> Result<IndexOutcome, CatalogError> {
        let metadata = tokio::fs::metadata(path).await?;
        let mtime = metadata
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let file_path = path.to_string_lossy().to_string();
        if let Some(stored) = self.store.file_mtime(&file_path).await? {
            if stored >= mtime {
                return Ok(IndexOutcome::Skipped);
            }
        }

        let parse_path = path.to_path_buf();
        let max_text = self.max_fts_text;
        let parsed = tokio::task::spawn_blocking(move || parse::parse_file(&parse_path, max_text))
            .await
            .map_err(|e| CatalogError::Store(format!("join: {e}")))??;

        if parsed.skipped_lines > 0 {
            tracing::warn!(
                path = %path.display(),
                skipped = parsed.skipped_lines,
                "skipped malformed lines"
            );
        }

        let project_path = path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let project_label = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let message_count = parsed.messages.len();
        let record = ConversationRecord {
            id: conversation_id(path),
            project_path,
            project_label,
            start_time: parsed
                .start_time
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            end_time: parsed
                .end_time
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            message_count: message_count as i64,
            file_path,
            file_mtime: mtime,
            last_indexed_at: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };

        self.store.apply_file(record, parsed.messages).await?;
        Ok(IndexOutcome::Indexed {
            messages: message_count,
        })
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationRecord>, CatalogError> {
        self.store.conversations().await
    }

    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>, CatalogError> {
        self.store.search(query, limit).await
    }

    pub async fn stats(&self) -> Result<StoreStats, CatalogError> {
        self.store.stats().await
    }

    pub async fn message_ids(&self) -> Result<Vec<String>, CatalogError> {
        self.store.message_ids().await
    }

    /// Wipes the catalogue. The only deletion path.
    pub async fn reset(&self) -> Result<(), CatalogError> {
        self.store.reset().await
    }
}
