//! Session-wide XP ledger.
//!
//! One ledger is shared by every challenge instance in a session. It is an
//! explicit injectable service rather than an ambient global so tests can
//! run isolated ledgers side by side. The balance never goes negative and
//! every mutation persists before it returns.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::store::ChallengeStore;

/// One entry of the fixed leveling table.
#[derive(Debug, Clone, Copy)]
pub struct LevelTier {
    pub name: &'static str,
    pub min_xp: u32,
}

/// Ordered by `min_xp`; the first entry must start at 0 so every balance
/// maps to a level.
pub const LEVEL_TABLE: &[LevelTier] = &[
    LevelTier { name: "Novice", min_xp: 0 },
    LevelTier { name: "Apprentice", min_xp: 50 },
    LevelTier { name: "Analyst", min_xp: 150 },
    LevelTier { name: "Strategist", min_xp: 400 },
    LevelTier { name: "Oracle", min_xp: 1000 },
];

pub struct XpLedger {
    store: Arc<ChallengeStore>,
    balance: Mutex<u32>,
}

impl XpLedger {
    /// Load the persisted balance from the store.
    pub fn load(store: Arc<ChallengeStore>) -> Result<Self> {
        let balance = store.xp_balance()?;
        Ok(Self {
            store,
            balance: Mutex::new(balance),
        })
    }

    /// Apply a delta, clamped at zero, and persist. The read-modify-write
    /// holds the balance lock across the store write so concurrent credits
    /// cannot lose an update. Returns the new balance.
    pub fn add_xp(&self, delta: i64) -> Result<u32> {
        let mut balance = self.balance.lock();
        let next = (*balance as i64 + delta).max(0) as u32;
        self.store.save_xp_balance(next)?;
        *balance = next;
        debug!(delta, balance = next, "xp balance updated");
        Ok(next)
    }

    /// Explicit reset to zero, persisted.
    pub fn reset(&self) -> Result<()> {
        let mut balance = self.balance.lock();
        self.store.save_xp_balance(0)?;
        *balance = 0;
        Ok(())
    }

    pub fn balance(&self) -> u32 {
        *self.balance.lock()
    }

    /// Highest tier whose threshold the balance has reached.
    pub fn level(&self) -> LevelTier {
        level_for(self.balance())
    }

    /// Progress toward the next tier in percent, clamped to 100 at the top.
    pub fn progress_pct(&self) -> f64 {
        progress_pct(self.balance())
    }
}

pub fn level_for(balance: u32) -> LevelTier {
    let mut current = LEVEL_TABLE[0];
    for tier in LEVEL_TABLE {
        if tier.min_xp <= balance {
            current = *tier;
        }
    }
    current
}

pub fn progress_pct(balance: u32) -> f64 {
    let current = level_for(balance);
    let next = LEVEL_TABLE.iter().find(|t| t.min_xp > balance);

    match next {
        Some(next) => {
            let span = (next.min_xp - current.min_xp) as f64;
            ((balance - current.min_xp) as f64 / span * 100.0).min(100.0)
        }
        None => 100.0,
    }
}
