use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Boundary between a "flat" classification and a directional call, in
/// percentage points. Shared by the price tracker's classification and the
/// scoring engine's draw rule; the two must never drift apart.
pub const FLAT_THRESHOLD_PCT: f64 = 0.30;

/// Direction of a price move, and the shape of a user's pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "flat" => Some(Direction::Flat),
            _ => None,
        }
    }

    /// Classify a percentage change. Exactly at the threshold counts as a
    /// directional move; only strictly-inside changes are flat.
    pub fn classify(change_pct: f64) -> Self {
        if change_pct.abs() < FLAT_THRESHOLD_PCT {
            Direction::Flat
        } else if change_pct > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

/// A user's one-shot directional forecast for one challenge round.
/// Immutable once stored; the store enforces write-once per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    pub direction: Direction,
    /// Stated confidence in percent, 50..=90.
    pub confidence: u8,
    pub submitted_at: DateTime<Utc>,
}

/// Latest known price from the Price Source. Absence of a price is a valid,
/// non-error response (instrument has no administered feed).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub price: Option<f64>,
    pub updated_at: Option<String>,
}

/// The reference price frozen at (or near) round start. Written once per
/// challenge key and never overwritten for the lifetime of the round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub challenge_key: String,
    pub reference_price: f64,
    pub captured_at: DateTime<Utc>,
}

/// Transient per-tick view of the price versus the frozen reference.
/// All-`None` when no valid price was available this tick.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PriceReading {
    pub current_price: Option<f64>,
    pub change_pct: Option<f64>,
    pub direction: Option<Direction>,
}

/// Finalized settlement of one round. Created exactly once per challenge key.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementRecord {
    pub challenge_key: String,
    pub user_id: String,
    pub outcome: Direction,
    pub xp_awarded: u32,
    pub posted_at: DateTime<Utc>,
}

/// One challenge round: an instrument, a horizon and its two boundary
/// instants. The key is derived deterministically so two rounds over the same
/// (symbol, horizon, deadline) collide by design; that collision is the
/// idempotency boundary.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// User-facing ticker, e.g. "BTC".
    pub ticker: String,
    /// Horizon label, e.g. "15m" or "1d".
    pub horizon: String,
    pub challenge_key: String,
    pub deadline: DateTime<Utc>,
    /// End of the settling window. Absent means settling has zero width.
    pub refresh_by: Option<DateTime<Utc>>,
}

impl Challenge {
    pub fn new(
        ticker: &str,
        horizon: &str,
        deadline: DateTime<Utc>,
        refresh_by: Option<DateTime<Utc>>,
    ) -> Self {
        let challenge_key = derive_challenge_key(ticker, horizon, deadline);
        Self {
            ticker: ticker.to_uppercase(),
            horizon: horizon.to_string(),
            challenge_key,
            deadline,
            refresh_by,
        }
    }

    /// Same round, but with an explicitly assigned key.
    pub fn with_key(mut self, challenge_key: String) -> Self {
        self.challenge_key = challenge_key;
        self
    }
}

/// Stable key for one prediction round.
pub fn derive_challenge_key(ticker: &str, horizon: &str, deadline: DateTime<Utc>) -> String {
    format!(
        "{}:{}:{}",
        ticker.to_uppercase(),
        horizon,
        deadline.timestamp()
    )
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub price_source_url: String,
    pub result_sink_url: String,
    pub user_id: String,
    pub clock_tick_secs: u64,
    pub price_poll_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./challenge.db".to_string());

        let price_source_url = std::env::var("PRICE_SOURCE_URL")
            .unwrap_or_else(|_| "http://localhost:8080/api".to_string());

        let result_sink_url = std::env::var("RESULT_SINK_URL")
            .unwrap_or_else(|_| "http://localhost:8080/api".to_string());

        let user_id = std::env::var("USER_ID").unwrap_or_else(|_| "local".to_string());

        let clock_tick_secs = std::env::var("CLOCK_TICK_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(1);

        let price_poll_secs = std::env::var("PRICE_POLL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(10);

        Ok(Self {
            database_path,
            price_source_url,
            result_sink_url,
            user_id,
            clock_tick_secs,
            price_poll_secs,
        })
    }
}
