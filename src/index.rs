//! Local sqlite index of published messages.
//!
//! The git store is the durable log; the index is a fast local cache used
//! for listing and `stats`. It can always be rebuilt by re-reading the
//! message files, so every statement here is idempotent for replays.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;

use crate::core::{MessageRecord, Timestamp};
use crate::error::{Effect, Transience};

const BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored timestamp for {id} is unreadable: {raw}")]
    BadRow { id: String, raw: String },
}

impl IndexError {
    pub fn transience(&self) -> Transience {
        match self {
            // Mostly lock contention under the busy timeout.
            IndexError::Sqlite(_) => Transience::Unknown,
            IndexError::Io { .. } => Transience::Unknown,
            IndexError::BadRow { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            IndexError::Sqlite(_) => Effect::Unknown,
            IndexError::Io { .. } | IndexError::BadRow { .. } => Effect::None,
        }
    }
}

/// Cached view of the published log, keyed by message id.
pub struct MessageIndex {
    conn: Connection,
}

impl MessageIndex {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|source| IndexError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::from_conn(conn)
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self, IndexError> {
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Record a message; replaying the same id refreshes the row.
    pub fn insert(&self, record: &MessageRecord) -> Result<(), IndexError> {
        self.conn.execute(
            "INSERT INTO messages (id, content, timestamp, commit_hash) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET \
               content = excluded.content, \
               timestamp = excluded.timestamp, \
               commit_hash = COALESCE(messages.commit_hash, excluded.commit_hash)",
            params![
                record.id,
                record.content,
                // Fixed-width form so the textual ORDER BY is chronological
                // even at mixed subsecond precision.
                record.timestamp.sortable(),
                record.commit_hash,
            ],
        )?;
        Ok(())
    }

    /// Attach the publishing commit to a message exactly once; later calls
    /// for the same id are no-ops.
    pub fn set_commit_hash(&self, id: &str, commit_hash: &str) -> Result<bool, IndexError> {
        let updated = self.conn.execute(
            "UPDATE messages SET commit_hash = ?2 \
             WHERE id = ?1 AND commit_hash IS NULL",
            params![id, commit_hash],
        )?;
        if updated == 0 {
            debug!(id, "commit hash already set or id unknown");
        }
        Ok(updated > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<MessageRecord>, IndexError> {
        self.conn
            .query_row(
                "SELECT id, content, timestamp, commit_hash FROM messages WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()?
            .transpose()
    }

    /// Newest first, with `timestamp DESC, id DESC` as a total order so
    /// pagination is stable across calls.
    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<MessageRecord>, IndexError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content, timestamp, commit_hash FROM messages \
             ORDER BY timestamp DESC, id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<u64, IndexError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<MessageRecord, IndexError>> {
    let id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let raw_timestamp: String = row.get(2)?;
    let commit_hash: Option<String> = row.get(3)?;
    let Ok(timestamp) = Timestamp::parse(&raw_timestamp) else {
        return Ok(Err(IndexError::BadRow {
            id,
            raw: raw_timestamp,
        }));
    };
    Ok(Ok(MessageRecord {
        id,
        content,
        timestamp,
        commit_hash,
    }))
}

fn initialize_schema(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
           id TEXT PRIMARY KEY,
           content TEXT NOT NULL,
           timestamp TEXT NOT NULL,
           commit_hash TEXT DEFAULT NULL
         );
         CREATE INDEX IF NOT EXISTS messages_by_timestamp
           ON messages (timestamp DESC, id DESC);",
    )?;
    Ok(())
}
