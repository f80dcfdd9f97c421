//! Bracket order construction.
//!
//! A bracket is a staged parent entry, a take-profit limit and a stop-loss
//! stop. The parent and take-profit are not transmitted; transmitting the
//! stop-loss releases the whole group.

use orb_broker::{Order, OrderAction, OrderKind, RequestId, TimeInForce};
use orb_core::TradeManagementConfig;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::ticks::round_down_to_tick;
use crate::types::TradeError;

/// Protective prices derived from an entry price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BracketPrices {
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
}

/// Take-profit and stop-loss prices for a long entry at `entry`.
///
/// Each level is rounded down with the tick of its own price band. A stop at
/// or above the entry moves one tick lower.
///
/// # Errors
///
/// [`TradeError::InvalidBracket`] for a non-positive entry or a stop that
/// would not be positive.
pub fn bracket_prices(entry: Decimal, tm: &TradeManagementConfig) -> Result<BracketPrices, TradeError> {
    if entry <= Decimal::ZERO {
        return Err(TradeError::invalid_bracket(format!("entry price {entry} is not positive")));
    }

    let tp_raw = entry * (Decimal::ONE + tm.take_profit_pct / Decimal::ONE_HUNDRED);
    let sl_raw = entry * (Decimal::ONE - tm.stop_loss_pct / Decimal::ONE_HUNDRED);
    let tp_tick = tm.tick_size.tick_for(tp_raw);
    let sl_tick = tm.tick_size.tick_for(sl_raw);

    let take_profit = round_down_to_tick(tp_raw, tp_tick);
    let mut stop_loss = round_down_to_tick(sl_raw, sl_tick);
    info!(
        %entry,
        tp_raw = %tp_raw,
        %tp_tick,
        %take_profit,
        sl_raw = %sl_raw,
        %sl_tick,
        %stop_loss,
        "Bracket prices calculated"
    );

    if stop_loss >= entry {
        warn!(%stop_loss, %entry, "Stop at or above entry, moving down one tick");
        stop_loss -= sl_tick;
    }
    if stop_loss <= Decimal::ZERO {
        return Err(TradeError::invalid_bracket(format!(
            "stop price {stop_loss} for entry {entry} is not positive"
        )));
    }

    Ok(BracketPrices {
        take_profit,
        stop_loss,
    })
}

/// The three orders of a bracket, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketOrders {
    pub parent: Order,
    pub take_profit: Order,
    pub stop_loss: Order,
}

impl BracketOrders {
    #[must_use]
    pub fn into_vec(self) -> Vec<Order> {
        vec![self.parent, self.take_profit, self.stop_loss]
    }
}

/// Attaches take-profit and stop-loss children to `parent`.
///
/// Children take the ids following the parent's, so the parent id must head
/// a reserved block of three. `entry` is the price protective levels are
/// derived from.
///
/// # Errors
///
/// [`TradeError::InvalidBracket`] when the parent is not a BUY or the prices
/// are unusable.
pub fn build_bracket(
    mut parent: Order,
    entry: Decimal,
    tm: &TradeManagementConfig,
) -> Result<BracketOrders, TradeError> {
    if parent.action != OrderAction::Buy {
        return Err(TradeError::invalid_bracket(format!(
            "only BUY parents are supported, got {}",
            parent.action
        )));
    }
    let prices = bracket_prices(entry, tm)?;
    parent.parent_id = None;
    parent.transmit = false;

    let take_profit = Order {
        order_id: parent.order_id + 1,
        parent_id: Some(parent.order_id),
        action: OrderAction::Sell,
        kind: OrderKind::Limit {
            price: prices.take_profit,
        },
        quantity: parent.quantity,
        tif: TimeInForce::Gtc,
        transmit: false,
    };
    let stop_loss = stop_order(parent.order_id + 2, parent.order_id, prices.stop_loss, parent.quantity);

    Ok(BracketOrders {
        parent,
        take_profit,
        stop_loss,
    })
}

/// A transmitted protective stop. Re-sending it with the same `order_id`
/// modifies the working order.
#[must_use]
pub const fn stop_order(order_id: RequestId, parent_id: RequestId, aux_price: Decimal, quantity: u32) -> Order {
    Order {
        order_id,
        parent_id: Some(parent_id),
        action: OrderAction::Sell,
        kind: OrderKind::Stop { aux_price },
        quantity,
        tif: TimeInForce::Gtc,
        transmit: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_core::{TickSizeConfig, TrailingStopConfig};
    use rust_decimal_macros::dec;

    fn management(tp: Decimal, sl: Decimal, tick_size: TickSizeConfig) -> TradeManagementConfig {
        TradeManagementConfig {
            take_profit_pct: tp,
            stop_loss_pct: sl,
            trailing_stop: TrailingStopConfig {
                activation_profit_pct: dec!(10),
                trail_pct: dec!(10),
            },
            tick_size,
        }
    }

    fn parent(order_id: RequestId, action: OrderAction) -> Order {
        Order {
            order_id,
            parent_id: None,
            action,
            kind: OrderKind::Limit { price: dec!(1.48) },
            quantity: 2,
            tif: TimeInForce::Day,
            transmit: true,
        }
    }

    #[test]
    fn test_prices_with_uniform_cent_tick() {
        let tm = management(dec!(50), dec!(20), TickSizeConfig::uniform(dec!(0.01)));
        let prices = bracket_prices(dec!(1.48), &tm).unwrap();
        assert_eq!(prices.take_profit, dec!(2.22));
        assert_eq!(prices.stop_loss, dec!(1.18));
    }

    #[test]
    fn test_each_level_uses_its_own_band() {
        // TP 3.15 sits in the 0.10 band, SL 1.68 in the 0.05 band.
        let tm = management(dec!(50), dec!(20), TickSizeConfig::default());
        let prices = bracket_prices(dec!(2.10), &tm).unwrap();
        assert_eq!(prices.take_profit, dec!(3.10));
        assert_eq!(prices.stop_loss, dec!(1.65));
    }

    #[test]
    fn test_stop_at_entry_moves_down_one_tick() {
        // Zero risk puts the stop on the entry itself.
        let tm = management(dec!(50), Decimal::ZERO, TickSizeConfig::uniform(dec!(0.05)));
        let prices = bracket_prices(dec!(1.50), &tm).unwrap();
        assert_eq!(prices.stop_loss, dec!(1.45));
    }

    #[test]
    fn test_rejects_unusable_prices() {
        let tm = management(dec!(50), dec!(20), TickSizeConfig::uniform(dec!(0.05)));
        assert!(matches!(bracket_prices(Decimal::ZERO, &tm), Err(TradeError::InvalidBracket(_))));
        // 0.01 * 0.8 rounds down to zero.
        assert!(matches!(bracket_prices(dec!(0.01), &tm), Err(TradeError::InvalidBracket(_))));
    }

    #[test]
    fn test_builds_linked_bracket() {
        let tm = management(dec!(50), dec!(20), TickSizeConfig::uniform(dec!(0.01)));
        let bracket = build_bracket(parent(100, OrderAction::Buy), dec!(1.48), &tm).unwrap();

        assert_eq!(bracket.parent.order_id, 100);
        assert!(!bracket.parent.transmit);

        assert_eq!(bracket.take_profit.order_id, 101);
        assert_eq!(bracket.take_profit.parent_id, Some(100));
        assert_eq!(bracket.take_profit.action, OrderAction::Sell);
        assert_eq!(bracket.take_profit.kind, OrderKind::Limit { price: dec!(2.22) });
        assert_eq!(bracket.take_profit.tif, TimeInForce::Gtc);
        assert!(!bracket.take_profit.transmit);

        assert_eq!(bracket.stop_loss.order_id, 102);
        assert_eq!(bracket.stop_loss.parent_id, Some(100));
        assert_eq!(bracket.stop_loss.kind, OrderKind::Stop { aux_price: dec!(1.18) });
        assert_eq!(bracket.stop_loss.quantity, 2);
        assert!(bracket.stop_loss.transmit);
    }

    #[test]
    fn test_rejects_sell_parent() {
        let tm = management(dec!(50), dec!(20), TickSizeConfig::uniform(dec!(0.01)));
        let err = build_bracket(parent(100, OrderAction::Sell), dec!(1.48), &tm).unwrap_err();
        assert!(matches!(err, TradeError::InvalidBracket(_)));
    }
}
