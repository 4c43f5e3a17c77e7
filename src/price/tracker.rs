//! Price tracker for one challenge instance.
//!
//! The first valid price observed for a challenge key freezes the round's
//! reference snapshot; it is never overwritten afterward, even if a later
//! fetch lands moments after round start. The snapshot is persisted through
//! the challenge store, so a restart mid-round rehydrates the same anchor
//! instead of re-baselining at the current price. Every later valid price
//! derives a transient reading (change percentage plus the three-way
//! classification) against that frozen reference.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{Direction, PriceQuote, PriceReading, PriceSnapshot};
use crate::price::source::{canonical_symbol, PriceSource};
use crate::store::ChallengeStore;

pub struct PriceTracker {
    /// Canonical Price Source key, resolved once from the user-facing ticker.
    symbol: String,
    challenge_key: String,
    store: Arc<ChallengeStore>,
    snapshot: RwLock<Option<PriceSnapshot>>,
    /// Last successfully computed reading. A failed tick reports all-`None`
    /// to its caller but does not clobber this.
    latest: RwLock<PriceReading>,
}

impl PriceTracker {
    /// Build a tracker, rehydrating a previously frozen reference snapshot
    /// for this challenge key if the store holds one.
    pub fn new(ticker: &str, challenge_key: &str, store: Arc<ChallengeStore>) -> Result<Self> {
        let snapshot = store.get_snapshot(challenge_key)?;
        if let Some(ref snapshot) = snapshot {
            debug!(
                challenge_key = %challenge_key,
                reference = snapshot.reference_price,
                "rehydrated reference snapshot"
            );
        }

        Ok(Self {
            symbol: canonical_symbol(ticker),
            challenge_key: challenge_key.to_string(),
            store,
            snapshot: RwLock::new(snapshot),
            latest: RwLock::new(PriceReading::default()),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Fetch the current price and fold it into the tracker. Upstream
    /// failures are logged and reported as an empty reading for this tick;
    /// the next tick retries.
    pub async fn poll_once(&self, source: &dyn PriceSource) -> PriceReading {
        match source.latest_price(&self.symbol).await {
            Ok(quote) => self.record_quote(&quote, Utc::now()),
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "price fetch failed");
                PriceReading::default()
            }
        }
    }

    /// Fold one quote into the tracker at an explicit instant.
    pub fn record_quote(&self, quote: &PriceQuote, now: DateTime<Utc>) -> PriceReading {
        // Non-finite and non-positive prices are treated as missing data.
        let Some(price) = quote.price.filter(|p| p.is_finite() && *p > 0.0) else {
            debug!(symbol = %self.symbol, "no valid price this tick");
            return PriceReading::default();
        };

        let reference = {
            let mut snapshot = self.snapshot.write();
            match snapshot.as_ref() {
                Some(existing) => existing.reference_price,
                None => {
                    let fresh = PriceSnapshot {
                        challenge_key: self.challenge_key.clone(),
                        reference_price: price,
                        captured_at: now,
                    };
                    // Durable write-once; a persistence failure keeps the
                    // in-memory anchor so this tick still classifies.
                    if let Err(e) = self.store.put_snapshot(&fresh) {
                        warn!(
                            challenge_key = %self.challenge_key,
                            error = %e,
                            "failed to persist reference snapshot"
                        );
                    }
                    debug!(
                        symbol = %self.symbol,
                        challenge_key = %self.challenge_key,
                        reference = price,
                        "reference snapshot captured"
                    );
                    *snapshot = Some(fresh);
                    price
                }
            }
        };

        let change_pct = (price - reference) / reference * 100.0;
        let reading = PriceReading {
            current_price: Some(price),
            change_pct: Some(change_pct),
            direction: Some(Direction::classify(change_pct)),
        };

        *self.latest.write() = reading;
        reading
    }

    /// Last successfully computed reading; all-`None` until the first valid
    /// price arrives.
    pub fn latest_reading(&self) -> PriceReading {
        *self.latest.read()
    }

    pub fn snapshot(&self) -> Option<PriceSnapshot> {
        self.snapshot.read().clone()
    }
}
