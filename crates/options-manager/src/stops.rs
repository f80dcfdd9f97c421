//! Milestone trailing stop.
//!
//! Every time profit crosses a new multiple of the activation percentage,
//! the risk below the average cost shrinks by `trail_pct`. The stop is only
//! ever raised.

use orb_core::TradeManagementConfig;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::ticks::round_down_to_tick;
use crate::types::{StopAdjustment, TrackedPosition};

/// `floor(profit_pct / activation_pct)`, zero below the first milestone.
#[must_use]
pub fn milestone_level(profit_pct: Decimal, activation_pct: Decimal) -> u32 {
    if activation_pct <= Decimal::ZERO || profit_pct < activation_pct {
        return 0;
    }
    (profit_pct / activation_pct).floor().to_u32().unwrap_or(u32::MAX)
}

/// Stop for `level` milestones: `avg_cost * (1 - (stop_loss_pct - level * trail_pct) / 100)`,
/// rounded down to `tick`.
#[must_use]
pub fn milestone_stop_price(avg_cost: Decimal, level: u32, tick: Decimal, tm: &TradeManagementConfig) -> Decimal {
    let risk_pct = tm.stop_loss_pct - Decimal::from(level) * tm.trailing_stop.trail_pct;
    round_down_to_tick(avg_cost * (Decimal::ONE - risk_pct / Decimal::ONE_HUNDRED), tick)
}

/// Checks whether `current_price` earns `position` a tighter stop.
///
/// Returns `None` until the position has an average cost, while the
/// milestone has not advanced, or when the new stop would not be strictly
/// above the current one.
#[must_use]
pub fn check_trailing_stop(
    position: &TrackedPosition,
    current_price: Decimal,
    tm: &TradeManagementConfig,
) -> Option<StopAdjustment> {
    let avg_cost = position.avg_cost.filter(|a| *a > Decimal::ZERO)?;
    let profit_pct = position.profit_pct(current_price)?;
    let level = milestone_level(profit_pct, tm.trailing_stop.activation_profit_pct);
    if level <= position.milestone_level {
        return None;
    }

    let stop_price = milestone_stop_price(avg_cost, level, position.tick_size, tm);
    if stop_price <= position.stop_price {
        debug!(
            parent_order_id = position.parent_order_id,
            level,
            %stop_price,
            current_stop = %position.stop_price,
            "Milestone reached but stop would not tighten"
        );
        return None;
    }

    info!(
        parent_order_id = position.parent_order_id,
        %profit_pct,
        level,
        %stop_price,
        previous_stop = %position.stop_price,
        "Trailing stop milestone crossed"
    );
    Some(StopAdjustment {
        milestone_level: level,
        stop_price,
    })
}
