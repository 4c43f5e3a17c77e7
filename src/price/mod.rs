pub mod source;
pub mod tracker;

pub use source::{canonical_symbol, HttpPriceSource, PriceSource};
pub use tracker::PriceTracker;
