//! Order lifecycle for breakout trades.
//!
//! Turns a breakout signal and a GEX strike into a bracket order on an
//! at-the-money option, correlates the broker's status feed back to the
//! tracked bracket, and raises the stop in milestone steps as the position
//! gains. All prices are tick-rounded in decimal arithmetic.

pub mod bracket;
pub mod decision;
pub mod manager;
pub mod stops;
pub mod ticks;
pub mod types;

pub use bracket::{bracket_prices, build_bracket, BracketOrders, BracketPrices};
pub use decision::{decide_option_right, select_atm_strike};
pub use manager::OrderManager;
pub use stops::{check_trailing_stop, milestone_level};
pub use ticks::{round_down_to_tick, round_to_tick};
pub use types::{StopAdjustment, TrackedPosition, TradeError};
