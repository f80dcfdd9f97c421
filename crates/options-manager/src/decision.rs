//! Option right and strike selection.

use orb_broker::OptionRight;
use orb_core::SignalType;
use rust_decimal::Decimal;
use tracing::info;

use crate::types::TradeError;

/// Maps (signal direction, GEX strike vs spot) to the option to buy.
///
/// | signal  | strike > spot | strike <= spot |
/// |---------|---------------|----------------|
/// | BUY     | call          | put            |
/// | SELL    | call          | put            |
///
/// The SELL row repeats the BUY row. It is kept as-is pending product-owner
/// confirmation.
///
/// # Errors
///
/// [`TradeError::NotActionable`] for a HOLD signal.
pub fn decide_option_right(
    signal: SignalType,
    spot: Decimal,
    gex_strike: Decimal,
) -> Result<OptionRight, TradeError> {
    let gex_above_spot = gex_strike > spot;
    let right = match (signal, gex_above_spot) {
        (SignalType::Buy | SignalType::Sell, true) => OptionRight::Call,
        (SignalType::Buy | SignalType::Sell, false) => OptionRight::Put,
        (SignalType::Hold, _) => return Err(TradeError::NotActionable(signal)),
    };
    info!(%signal, %spot, %gex_strike, gex_above_spot, %right, "Trade direction decided");
    Ok(right)
}

/// Strike closest to `spot`. Ties keep the first strike in `strikes` order.
///
/// # Errors
///
/// [`TradeError::EmptyStrikeUniverse`] when `strikes` is empty.
pub fn select_atm_strike(spot: Decimal, strikes: &[Decimal]) -> Result<Decimal, TradeError> {
    strikes
        .iter()
        .copied()
        .fold(None, |best: Option<Decimal>, strike| match best {
            Some(b) if (b - spot).abs() <= (strike - spot).abs() => Some(b),
            _ => Some(strike),
        })
        .ok_or(TradeError::EmptyStrikeUniverse)
}
