//! Invite-cooldown cache backed by SQLite.
//!
//! A tiny key/value table with per-row expiry. Expired rows read as absent
//! and are purged whenever a new value is stored.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use crate::unix_now;

pub struct CooldownCache {
    db: Connection,
    ttl: Duration,
}

impl CooldownCache {
    /// Open or create the cache table in the database at `path`.
    pub fn open(path: &Path, ttl: Duration) -> rusqlite::Result<Self> {
        Self::init(Connection::open(path)?, ttl)
    }

    /// In-memory cache (for tests).
    pub fn in_memory(ttl: Duration) -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?, ttl)
    }

    fn init(db: Connection, ttl: Duration) -> rusqlite::Result<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS cooldown (
                key TEXT PRIMARY KEY,
                value REAL NOT NULL,
                expires_at REAL NOT NULL
            );",
        )?;
        Ok(Self { db, ttl })
    }

    /// Change the expiry applied to future writes.
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    pub fn get(&self, key: &str) -> rusqlite::Result<Option<f64>> {
        self.get_at(key, unix_now())
    }

    pub fn set(&self, key: &str, value: f64) -> rusqlite::Result<()> {
        self.set_at(key, value, unix_now())
    }

    fn get_at(&self, key: &str, now: f64) -> rusqlite::Result<Option<f64>> {
        self.db
            .query_row(
                "SELECT value FROM cooldown WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get(0),
            )
            .optional()
    }

    fn set_at(&self, key: &str, value: f64, now: f64) -> rusqlite::Result<()> {
        self.db
            .execute("DELETE FROM cooldown WHERE expires_at <= ?1", params![now])?;
        self.db.execute(
            "INSERT OR REPLACE INTO cooldown (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, now + self.ttl.as_secs_f64()],
        )?;
        Ok(())
    }
}
