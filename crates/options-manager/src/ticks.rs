//! Tick-conformant price rounding in decimal arithmetic.

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds `price` to the nearest multiple of `tick`, ties to the even multiple.
/// Used for entry limits.
///
/// A non-positive tick falls back to cents.
#[must_use]
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    round_with(price, tick, RoundingStrategy::MidpointNearestEven)
}

/// Rounds `price` down to a multiple of `tick`. Used for protective orders so
/// a rounded price never exceeds the computed one.
#[must_use]
pub fn round_down_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    round_with(price, tick, RoundingStrategy::ToZero)
}

fn round_with(price: Decimal, tick: Decimal, strategy: RoundingStrategy) -> Decimal {
    if tick <= Decimal::ZERO {
        return price.round_dp_with_strategy(2, strategy);
    }
    let ticks = (price / tick).round_dp_with_strategy(0, strategy);
    (ticks * tick).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_half_even_entry_rounding() {
        // 19.675 / 0.05 = 393.5, the even neighbour is 394.
        assert_eq!(round_to_tick(dec!(19.675), dec!(0.05)), dec!(19.70));
        // 19.625 / 0.05 = 392.5, the even neighbour is 392.
        assert_eq!(round_to_tick(dec!(19.625), dec!(0.05)), dec!(19.60));
        assert_eq!(round_to_tick(dec!(1.52), dec!(0.05)), dec!(1.50));
        assert_eq!(round_to_tick(dec!(3.46), dec!(0.10)), dec!(3.50));
    }

    #[test]
    fn test_round_down_never_increases() {
        let prices = [dec!(1.184), dec!(2.2299), dec!(0.049), dec!(7.77), dec!(3.00)];
        for tick in [dec!(0.01), dec!(0.05), dec!(0.10)] {
            for price in prices {
                let rounded = round_down_to_tick(price, tick);
                assert!(rounded <= price, "{price} rounded up to {rounded} with tick {tick}");
                assert!(price - rounded < tick);
            }
        }
    }

    #[test]
    fn test_round_down_is_idempotent() {
        for (price, tick) in [(dec!(1.18), dec!(0.01)), (dec!(1.60), dec!(0.05)), (dec!(3.10), dec!(0.10))] {
            let once = round_down_to_tick(price, tick);
            assert_eq!(once, price);
            assert_eq!(round_down_to_tick(once, tick), once);
        }
    }

    #[test]
    fn test_non_positive_tick_rounds_to_cents() {
        assert_eq!(round_to_tick(dec!(1.235), Decimal::ZERO), dec!(1.24));
        assert_eq!(round_down_to_tick(dec!(1.239), dec!(-0.05)), dec!(1.23));
    }
}
