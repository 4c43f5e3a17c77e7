//! XP scoring for a graded pick.
//!
//! Pure and total over the 3x3 (pick direction x outcome) space. The hit
//! check runs strictly before the draw check: a flat pick against a flat
//! outcome is a hit (base + bonus), never a draw.

use crate::models::{Direction, Pick};

/// Base award for calling the outcome exactly.
pub const HIT_BASE_XP: u32 = 10;
/// Consolation award when either side of the grade is flat.
pub const DRAW_XP: u32 = 3;

/// Map (pick, realized outcome) to an XP award. Never negative.
pub fn score(pick: &Pick, outcome: Direction) -> u32 {
    if pick.direction == outcome {
        HIT_BASE_XP + confidence_bonus(pick.confidence)
    } else if outcome == Direction::Flat || pick.direction == Direction::Flat {
        DRAW_XP
    } else {
        0
    }
}

/// Bonus tiers for stated confidence on a hit.
fn confidence_bonus(confidence: u8) -> u32 {
    match confidence {
        c if c >= 90 => 2,
        c if c >= 70 => 1,
        _ => 0,
    }
}
