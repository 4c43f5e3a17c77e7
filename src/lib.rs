//! Challenge Settlement & Scoring Engine
//!
//! One-shot directional predictions on a financial instrument: a pick is
//! stored once per challenge key, the instrument's price is tracked against
//! a frozen reference, the round moves through open -> settling -> closed as
//! a pure projection of the clock, and on close the outcome is resolved,
//! scored into XP, and reported to the result sink at most once.

pub mod heuristic;
pub mod ledger;
pub mod models;
pub mod outcome;
pub mod phase;
pub mod price;
pub mod runtime;
pub mod scoring;
pub mod settlement;
pub mod store;

pub use ledger::{XpLedger, LEVEL_TABLE};
pub use models::{Challenge, Config, Direction, Pick, PriceReading, SettlementRecord};
pub use phase::{phase_of, Phase};
pub use price::{HttpPriceSource, PriceSource, PriceTracker};
pub use runtime::{ChallengeRuntime, ChallengeStatus};
pub use settlement::{HttpResultSink, ResultSink, SettlementOrchestrator};
pub use store::ChallengeStore;
