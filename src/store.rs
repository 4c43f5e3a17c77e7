//! Durable challenge store.
//!
//! One sqlite database backs the three pieces of state that must survive a
//! restart: submitted picks (write-once per challenge key), result-posted
//! flags (the idempotency markers for settlement), and the XP balance.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{Direction, Pick, PriceSnapshot};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS picks (
    challenge_key TEXT PRIMARY KEY,
    direction TEXT NOT NULL,
    confidence INTEGER NOT NULL,
    submitted_at TEXT NOT NULL
) WITHOUT ROWID;

-- One row per settled challenge; presence of the row is the flag.
CREATE TABLE IF NOT EXISTS posted_results (
    challenge_key TEXT PRIMARY KEY,
    posted_at TEXT NOT NULL
) WITHOUT ROWID;

-- The frozen reference price anchoring each round; write-once per key.
CREATE TABLE IF NOT EXISTS price_snapshots (
    challenge_key TEXT PRIMARY KEY,
    reference_price REAL NOT NULL,
    captured_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;
"#;

const XP_BALANCE_KEY: &str = "xp_balance";

/// Sqlite-backed store shared by all challenge instances in a session.
pub struct ChallengeStore {
    conn: Arc<Mutex<Connection>>,
}

impl ChallengeStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("failed to open database at {}", db_path))?;

        Self::init(conn, db_path)
    }

    /// In-memory store for tests and ephemeral sessions.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, db_path: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize challenge store schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("challenge store initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Store a pick for a challenge key. Write-once: returns `false` without
    /// touching the row when a pick already exists for the key.
    pub fn put_pick(&self, challenge_key: &str, pick: &Pick) -> Result<bool> {
        let conn = self.conn.lock();
        let changes = conn
            .execute(
                "INSERT OR IGNORE INTO picks (challenge_key, direction, confidence, submitted_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    challenge_key,
                    pick.direction.as_str(),
                    pick.confidence,
                    pick.submitted_at.to_rfc3339(),
                ],
            )
            .context("failed to store pick")?;
        Ok(changes > 0)
    }

    pub fn get_pick(&self, challenge_key: &str) -> Result<Option<Pick>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT direction, confidence, submitted_at FROM picks WHERE challenge_key = ?1",
        )?;

        let row = stmt
            .query_row(params![challenge_key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
            .context("failed to load pick")?;

        let Some((direction, confidence, submitted_at)) = row else {
            return Ok(None);
        };

        let direction = Direction::parse(&direction)
            .with_context(|| format!("unknown pick direction in store: {}", direction))?;
        let submitted_at = DateTime::parse_from_rfc3339(&submitted_at)
            .context("malformed pick timestamp in store")?
            .with_timezone(&Utc);

        Ok(Some(Pick {
            direction,
            confidence,
            submitted_at,
        }))
    }

    /// Whether a settlement result was already durably posted for this key.
    pub fn result_posted(&self, challenge_key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT 1 FROM posted_results WHERE challenge_key = ?1")?;
        let exists = stmt
            .exists(params![challenge_key])
            .context("failed to read posted flag")?;
        Ok(exists)
    }

    /// Set the posted flag. Idempotent: marking twice is a no-op.
    pub fn mark_result_posted(&self, challenge_key: &str, posted_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO posted_results (challenge_key, posted_at) VALUES (?1, ?2)",
            params![challenge_key, posted_at.to_rfc3339()],
        )
        .context("failed to set posted flag")?;
        Ok(())
    }

    /// Persist a round's reference snapshot. Write-once like the pick:
    /// returns `false` and leaves the row alone when one already exists.
    pub fn put_snapshot(&self, snapshot: &PriceSnapshot) -> Result<bool> {
        let conn = self.conn.lock();
        let changes = conn
            .execute(
                "INSERT OR IGNORE INTO price_snapshots (challenge_key, reference_price, captured_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    snapshot.challenge_key,
                    snapshot.reference_price,
                    snapshot.captured_at.to_rfc3339(),
                ],
            )
            .context("failed to store price snapshot")?;
        Ok(changes > 0)
    }

    pub fn get_snapshot(&self, challenge_key: &str) -> Result<Option<PriceSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT reference_price, captured_at FROM price_snapshots WHERE challenge_key = ?1",
        )?;

        let row = stmt
            .query_row(params![challenge_key], |row| {
                Ok((row.get::<_, f64>(0)?, row.get::<_, String>(1)?))
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
            .context("failed to load price snapshot")?;

        let Some((reference_price, captured_at)) = row else {
            return Ok(None);
        };

        let captured_at = DateTime::parse_from_rfc3339(&captured_at)
            .context("malformed snapshot timestamp in store")?
            .with_timezone(&Utc);

        Ok(Some(PriceSnapshot {
            challenge_key: challenge_key.to_string(),
            reference_price,
            captured_at,
        }))
    }

    pub fn xp_balance(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![XP_BALANCE_KEY],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
            .context("failed to read xp balance")?;

        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub fn save_xp_balance(&self, balance: u32) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![XP_BALANCE_KEY, balance.to_string()],
        )
        .context("failed to persist xp balance")?;
        Ok(())
    }
}
