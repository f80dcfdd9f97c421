//! Signal side of the opening-range breakout trader: the opening range,
//! breakout detection on aggregated candles, and max-gamma strike resolution.

pub mod breakout;
pub mod gex;
pub mod opening_range;

pub use breakout::{BreakoutDetector, STRATEGY_TAG};
pub use gex::{create_resolver, GexError, GexResolver, GexResult};
pub use opening_range::OpeningRangeCalculator;
