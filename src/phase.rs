//! Challenge lifecycle phases.
//!
//! A phase is a pure projection of wall-clock time against the round's two
//! boundary instants, not an event-driven state machine. The runtime
//! re-evaluates it every clock tick; transitions are observed, never
//! triggered, so there are no illegal states to guard against.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Before the deadline: picks accepted, price tracked.
    Open,
    /// Between deadline and refresh-by: waiting for the settlement window.
    Settling,
    /// At or past refresh-by: outcome can be resolved.
    Closed,
}

/// Project the phase for one round. Total over all inputs; a missing
/// `refresh_by` collapses the settling window to zero width.
pub fn phase_of(
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    refresh_by: Option<DateTime<Utc>>,
) -> Phase {
    if now < deadline {
        return Phase::Open;
    }
    match refresh_by {
        Some(refresh_by) if now < refresh_by => Phase::Settling,
        _ => Phase::Closed,
    }
}
