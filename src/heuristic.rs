//! Lexical confidence heuristic over a news digest.
//!
//! Scans headline titles for positive/negative signal words plus a small
//! strong-mover list with asymmetric weights, then maps the net score to a
//! suggested confidence percentage. Weak net signal is regressed toward
//! neutral so the UI never presents false precision.

use serde::Deserialize;

/// One digest entry. Providers attach more fields; only the title is read.
#[derive(Debug, Clone, Deserialize)]
pub struct DigestItem {
    pub title: String,
}

/// Suggested confidence when the digest is empty.
pub const DEFAULT_CONFIDENCE: u8 = 70;

/// Net lexical score is clamped to this band before rescaling.
const SCORE_CLAMP: i32 = 6;

const POSITIVE_WORDS: &[&str] = &[
    "surge", "rally", "beat", "gain", "soar", "jump", "upgrade", "strong", "growth", "bullish",
    "rebound", "optimis",
];

const NEGATIVE_WORDS: &[&str] = &[
    "plunge", "slump", "tumble", "drop", "miss", "warning", "lawsuit", "recall", "bearish",
    "layoff", "selloff", "fears",
];

/// Outsized movers, weighted double. "downgrade" and "cut" count against the
/// instrument; the rest count for it.
const STRONG_MOVERS: &[&str] = &["record high", "all-time high", "breakout", "downgrade", "cut"];

/// Score a set of headline titles and map the result to a confidence
/// percentage in [50, 90].
pub fn confidence_from_digest<S: AsRef<str>>(titles: &[S]) -> u8 {
    if titles.is_empty() {
        return DEFAULT_CONFIDENCE;
    }

    let mut score: i32 = 0;
    for title in titles {
        let title = title.as_ref().to_lowercase();

        for word in POSITIVE_WORDS {
            if title.contains(word) {
                score += 1;
            }
        }
        for word in NEGATIVE_WORDS {
            if title.contains(word) {
                score -= 1;
            }
        }
        for word in STRONG_MOVERS {
            if title.contains(word) {
                score += match *word {
                    "downgrade" | "cut" => -2,
                    _ => 2,
                };
            }
        }
    }

    let clamped = score.clamp(-SCORE_CLAMP, SCORE_CLAMP);

    // Linear rescale: -6 -> 50, 0 -> 70, +6 -> 90.
    let mut confidence =
        (50.0 + (clamped + SCORE_CLAMP) as f64 / (2 * SCORE_CLAMP) as f64 * 40.0).round() as i32;

    // Weak signal regresses toward neutral.
    if clamped.abs() <= 1 {
        confidence = confidence.clamp(60, 75);
    }

    confidence as u8
}

/// [`confidence_from_digest`] over provider-shaped digest items.
pub fn confidence_from_items(items: &[DigestItem]) -> u8 {
    let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
    confidence_from_digest(&titles)
}
