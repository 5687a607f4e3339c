//! SQLite-backed catalogue store.
//!
//! One file, write-ahead logging, three tables plus the FTS5 virtual table
//! (`porter unicode61` tokeniser, so searches stem and segment Unicode
//! words). The indexer is the only writer; readers open their own
//! connections and WAL keeps them isolated. All rusqlite work runs inside
//! `spawn_blocking` closures that open a fresh connection.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::parse::ParsedMessage;
use crate::CatalogError;

/// One row of the `conversations` table, ready for insertion or as read
/// back for the query layer.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationRecord {
    pub id: String,
    pub project_path: String,
    pub project_label: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub message_count: i64,
    pub file_path: String,
    pub file_mtime: i64,
    pub last_indexed_at: String,
}

/// One full-text search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub conversation_id: String,
    pub message_id: String,
    pub kind: String,
    pub snippet: String,
    pub timestamp: Option<String>,
}

/// Row counts, used by tests and the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub conversations: u64,
    pub messages: u64,
    pub fts_rows: u64,
}

pub struct Store {
    db_path: PathBuf,
}

fn rfc3339(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

impl Store {
    /// Opens (creating if needed) the catalogue and ensures the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;
        // WAL lets the query layer read while the indexer writes.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id              TEXT PRIMARY KEY,
                project_path    TEXT NOT NULL,
                project_label   TEXT NOT NULL,
                start_time      TEXT,
                end_time        TEXT,
                message_count   INTEGER NOT NULL DEFAULT 0,
                file_path       TEXT NOT NULL UNIQUE,
                file_mtime      INTEGER NOT NULL,
                last_indexed_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id                    TEXT PRIMARY KEY,
                conversation_id       TEXT NOT NULL,
                parent_id             TEXT,
                kind                  TEXT NOT NULL,
                timestamp             TEXT,
                cwd                   TEXT,
                git_branch            TEXT,
                session_id            TEXT,
                agent_id              TEXT,
                is_sidechain          INTEGER NOT NULL DEFAULT 0,
                model                 TEXT,
                input_tokens          INTEGER NOT NULL DEFAULT 0,
                output_tokens         INTEGER NOT NULL DEFAULT 0,
                cache_read_tokens     INTEGER NOT NULL DEFAULT 0,
                cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
                content_json          TEXT,
                tool_use_json         TEXT,
                tool_result_json      TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id);
            CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
                conversation_id UNINDEXED,
                message_id UNINDEXED,
                kind UNINDEXED,
                text,
                tool_names,
                timestamp UNINDEXED,
                tokenize = 'porter unicode61'
            );
            "#,
        )?;
        Ok(Self { db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(path: &Path) -> Result<Connection, rusqlite::Error> {
        Connection::open(path)
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, CatalogError>
    where
        T: Send + 'static,
        F: FnOnce(Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Store::connect(&path)?;
            work(conn)
        })
        .await
        .map_err(|e| CatalogError::Store(format!("join: {e}")))?
        .map_err(CatalogError::from)
    }

    /// Stored file mtime for a path, if the conversation is known.
    pub async fn file_mtime(&self, file_path: &str) -> Result<Option<i64>, CatalogError> {
        let file_path = file_path.to_string();
        self.blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT file_mtime FROM conversations WHERE file_path = ?1")?;
            let mut rows = stmt.query(params![file_path])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Applies one indexed file in a single transaction: drop the
    /// conversation's old message and FTS rows, upsert the conversation
    /// row, bulk-insert the new messages.
    pub async fn apply_file(
        &self,
        record: ConversationRecord,
        messages: Vec<ParsedMessage>,
    ) -> Result<(), CatalogError> {
        self.blocking(move |mut conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![record.id],
            )?;
            tx.execute(
                "DELETE FROM messages_fts WHERE conversation_id = ?1",
                params![record.id],
            )?;
            tx.execute(
                r#"
                INSERT INTO conversations
                    (id, project_path, project_label, start_time, end_time,
                     message_count, file_path, file_mtime, last_indexed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(file_path) DO UPDATE SET
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    message_count = excluded.message_count,
                    file_mtime = excluded.file_mtime,
                    last_indexed_at = excluded.last_indexed_at
                "#,
                params![
                    record.id,
                    record.project_path,
                    record.project_label,
                    record.start_time,
                    record.end_time,
                    record.message_count,
                    record.file_path,
                    record.file_mtime,
                    record.last_indexed_at,
                ],
            )?;

            {
                let mut insert_message = tx.prepare(
                    r#"
                    INSERT OR REPLACE INTO messages
                        (id, conversation_id, parent_id, kind, timestamp, cwd,
                         git_branch, session_id, agent_id, is_sidechain, model,
                         input_tokens, output_tokens, cache_read_tokens,
                         cache_creation_tokens, content_json, tool_use_json,
                         tool_result_json)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                            ?13, ?14, ?15, ?16, ?17, ?18)
                    "#,
                )?;
                let mut insert_fts = tx.prepare(
                    r#"
                    INSERT INTO messages_fts
                        (conversation_id, message_id, kind, text, tool_names, timestamp)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )?;
                for message in &messages {
                    let timestamp = rfc3339(&message.timestamp);
                    insert_message.execute(params![
                        message.id,
                        record.id,
                        message.parent_id,
                        message.kind,
                        timestamp,
                        message.cwd,
                        message.git_branch,
                        message.session_id,
                        message.agent_id,
                        message.is_sidechain as i64,
                        message.model,
                        message.input_tokens,
                        message.output_tokens,
                        message.cache_read_tokens,
                        message.cache_creation_tokens,
                        message.content_json,
                        message.tool_use_json,
                        message.tool_result_json,
                    ])?;
                    insert_fts.execute(params![
                        record.id,
                        message.id,
                        message.kind,
                        message.text,
                        message.tool_names,
                        timestamp,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// All conversations, most recently active first.
    pub async fn conversations(&self) -> Result<Vec<ConversationRecord>, CatalogError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, project_path, project_label, start_time, end_time,
                       message_count, file_path, file_mtime, last_indexed_at
                FROM conversations
                ORDER BY end_time DESC
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ConversationRecord {
                    id: row.get(0)?,
                    project_path: row.get(1)?,
                    project_label: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                    message_count: row.get(5)?,
                    file_path: row.get(6)?,
                    file_mtime: row.get(7)?,
                    last_indexed_at: row.get(8)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// Full-text search over message text and tool names. The whole query
    /// is quoted as one FTS phrase so raw input cannot break the MATCH
    /// syntax; stemming still applies inside the phrase.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>, CatalogError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let phrase = format!("\"{}\"", query.replace('"', "\"\""));
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT conversation_id, message_id, kind,
                       snippet(messages_fts, 3, '[', ']', ' … ', 12),
                       timestamp
                FROM messages_fts
                WHERE messages_fts MATCH ?1
                ORDER BY rank
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![phrase, limit as i64], |row| {
                Ok(SearchHit {
                    conversation_id: row.get(0)?,
                    message_id: row.get(1)?,
                    kind: row.get(2)?,
                    snippet: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// All message ids in the catalogue, sorted. The id set must equal the
    /// set of non-empty `uuid` values in the on-disk files.
    pub async fn message_ids(&self) -> Result<Vec<String>, CatalogError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM messages ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
        .await
    }

    pub async fn stats(&self) -> Result<StoreStats, CatalogError> {
        self.blocking(|conn| {
            let count = |sql: &str| -> Result<u64, rusqlite::Error> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
            };
            Ok(StoreStats {
                conversations: count("SELECT COUNT(*) FROM conversations")?,
                messages: count("SELECT COUNT(*) FROM messages")?,
                fts_rows: count("SELECT COUNT(*) FROM messages_fts")?,
            })
        })
        .await
    }

    /// Explicit wipe. The indexer never deletes otherwise.
    pub async fn reset(&self) -> Result<(), CatalogError> {
        self.blocking(|conn| {
            conn.execute_batch(
                r#"
                DELETE FROM messages_fts;
                DELETE FROM messages;
                DELETE FROM conversations;
                "#,
            )?;
            Ok(())
        })
        .await
    }
}
