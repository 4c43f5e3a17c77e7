//! Outcome resolution for a closed round.
//!
//! Prefers the tracker's real classification. When no reference price was
//! ever captured for the instrument there is nothing to classify, so the
//! outcome falls back to a uniform random draw. That keeps unpriced
//! instruments playable, but the result is not economically meaningful,
//! which is why the provenance travels with it.

use rand::Rng;
use serde::Serialize;

use crate::models::{Direction, PriceReading};

/// Where a resolved outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// Classified from an observed price change against the frozen reference.
    Real,
    /// Random draw; no price signal ever existed for this round.
    Simulated,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedOutcome {
    pub direction: Direction,
    pub source: OutcomeSource,
}

/// Resolve the realized outcome from the latest price reading.
pub fn resolve_outcome(reading: &PriceReading) -> ResolvedOutcome {
    resolve_outcome_with(reading, &mut rand::thread_rng())
}

/// As [`resolve_outcome`], with an injected RNG for deterministic tests.
pub fn resolve_outcome_with<R: Rng>(reading: &PriceReading, rng: &mut R) -> ResolvedOutcome {
    // A direction is only trusted when a change was actually computed, i.e.
    // a snapshot existed before the round closed.
    if let (Some(direction), Some(_)) = (reading.direction, reading.change_pct) {
        return ResolvedOutcome {
            direction,
            source: OutcomeSource::Real,
        };
    }

    let direction = match rng.gen_range(0..3) {
        0 => Direction::Up,
        1 => Direction::Down,
        _ => Direction::Flat,
    };

    ResolvedOutcome {
        direction,
        source: OutcomeSource::Simulated,
    }
}
