//! Outbound job queue for chat events.
//!
//! Events are appended as JSON rows to a SQLite `jobs` table; a separate
//! worker consumes them. The bot never reads its own jobs back except in
//! tests.

use std::path::Path;

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

/// Queue name written on every job row.
pub const QUEUE_NAME: &str = "chat-events";

/// Kind of logged activity; serialized as its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventKind {
    Message = 0,
    Action = 1,
    Notice = 2,
    Topic = 3,
}

impl From<EventKind> for u8 {
    fn from(kind: EventKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for EventKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Message),
            1 => Ok(Self::Action),
            2 => Ok(Self::Notice),
            3 => Ok(Self::Topic),
            other => Err(format!("unknown event kind {other}")),
        }
    }
}

/// One logged line, as handed to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Unix time with sub-second precision.
    pub timestamp: f64,
    pub network: String,
    pub channel: String,
    pub event_kind: EventKind,
    /// `None` for server-originated events (e.g. topic replies).
    pub nick: Option<String>,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("queue write failed: {0}")]
    Queue(#[from] rusqlite::Error),
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct JobQueue {
    db: Connection,
}

impl JobQueue {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// In-memory queue (for tests).
    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> rusqlite::Result<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { db })
    }

    pub fn publish(&self, event: &ChatEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.db.execute(
            "INSERT INTO jobs (queue, payload, created_at) VALUES (?1, ?2, ?3)",
            params![QUEUE_NAME, payload, now],
        )?;
        Ok(())
    }

    /// All queued events in insertion order.
    pub fn events(&self) -> Result<Vec<ChatEvent>, PublishError> {
        let mut stmt = self
            .db
            .prepare("SELECT payload FROM jobs WHERE queue = ?1 ORDER BY id ASC")?;
        let payloads = stmt
            .query_map(params![QUEUE_NAME], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(PublishError::from))
            .collect()
    }
}
