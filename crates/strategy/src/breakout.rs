use chrono::{DateTime, Utc};
use orb_core::{Bar, ConfigError, OpeningRange, Signal, SignalType};
use tracing::{debug, info};

pub const STRATEGY_TAG: &str = "BreakoutStrategy";

/// Aggregates fine-grained real-time bars into clock-aligned candles and
/// checks each completed candle against the opening range.
///
/// A candle's window is `floor(unix_ts / window) * window`, so a 60 s window
/// always starts on the minute no matter when the first bar arrives. A
/// candle is only evaluated once a bar from the next window proves it closed.
#[derive(Debug)]
pub struct BreakoutDetector {
    symbol: String,
    window_seconds: i64,
    in_progress: Option<Bar>,
}

impl BreakoutDetector {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a non-positive window.
    pub fn new(symbol: &str, window_seconds: i64) -> Result<Self, ConfigError> {
        if window_seconds <= 0 {
            return Err(ConfigError::Invalid {
                field: "breakout.bar_size_seconds",
                reason: format!("must be positive, got {window_seconds}"),
            });
        }
        info!(symbol, window_seconds, "Breakout detector initialized");
        Ok(Self {
            symbol: symbol.to_string(),
            window_seconds,
            in_progress: None,
        })
    }

    /// Candle start for the window containing `ts`.
    #[must_use]
    pub fn window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let floored = secs.div_euclid(self.window_seconds) * self.window_seconds;
        DateTime::from_timestamp(floored, 0).unwrap_or(ts)
    }

    #[must_use]
    pub const fn in_progress(&self) -> Option<&Bar> {
        self.in_progress.as_ref()
    }

    /// Folds `bar` in. Returns BUY/SELL only when `bar` closes a candle that
    /// broke out of `range`; HOLD otherwise.
    pub fn on_bar(&mut self, bar: &Bar, range: &OpeningRange) -> Signal {
        let window = self.window_start(bar.timestamp);
        let fresh = Bar::new(window, bar.open, bar.high, bar.low, bar.close, bar.volume);

        let completed = match self.in_progress.as_mut() {
            None => {
                debug!(%window, "Starting candle");
                self.in_progress = Some(fresh);
                None
            }
            Some(candle) if candle.timestamp == window => {
                candle.high = candle.high.max(bar.high);
                candle.low = candle.low.min(bar.low);
                candle.close = bar.close;
                candle.volume += bar.volume;
                None
            }
            Some(_) => {
                debug!(%window, "Starting candle");
                self.in_progress.replace(fresh)
            }
        };

        match completed {
            Some(candle) => self.evaluate(&candle, range),
            None => Signal::hold(bar.timestamp, &self.symbol, STRATEGY_TAG),
        }
    }

    /// Classifies a completed candle against the opening range.
    #[must_use]
    pub fn evaluate(&self, candle: &Bar, range: &OpeningRange) -> Signal {
        debug!(
            candle = %candle.timestamp,
            open = %candle.open,
            high = %candle.high,
            low = %candle.low,
            close = %candle.close,
            range_high = %range.high,
            range_low = %range.low,
            "Candle completed"
        );

        let signal_type = if candle.close > candle.open && candle.low > range.high {
            SignalType::Buy
        } else if candle.close < candle.open && candle.high < range.low {
            SignalType::Sell
        } else {
            return Signal::hold(candle.timestamp, &self.symbol, STRATEGY_TAG);
        };

        info!(
            signal = %signal_type,
            candle = %candle.timestamp,
            close = %candle.close,
            "Breakout detected"
        );
        Signal {
            timestamp: candle.timestamp,
            symbol: self.symbol.clone(),
            signal_type,
            strategy: STRATEGY_TAG.to_string(),
            price: Some(candle.close),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn range() -> OpeningRange {
        OpeningRange {
            high: dec!(4000),
            low: dec!(3990),
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn bar(seconds: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar::new(at(seconds), open, high, low, close, dec!(10))
    }

    fn flat(seconds: i64, price: Decimal) -> Bar {
        bar(seconds, price, price, price, price)
    }

    #[test]
    fn test_rejects_non_positive_window() {
        assert!(BreakoutDetector::new("SPX", 0).is_err());
        assert!(BreakoutDetector::new("SPX", -60).is_err());
    }

    #[test]
    fn test_windows_align_to_clock_boundaries() {
        let mut detector = BreakoutDetector::new("SPX", 60).unwrap();
        // 00:07, 00:12, ..., 00:57
        for i in 0..11 {
            let signal = detector.on_bar(&flat(7 + 5 * i, dec!(3995)), &range());
            assert_eq!(signal.signal_type, SignalType::Hold);
        }
        let candle = detector.in_progress().unwrap();
        assert_eq!(candle.timestamp, at(0));
        assert_eq!(candle.volume, dec!(110));

        detector.on_bar(&flat(62, dec!(3995)), &range());
        let candle = detector.in_progress().unwrap();
        assert_eq!(candle.timestamp, at(60));
        assert_eq!(candle.volume, dec!(10));
    }

    #[test]
    fn test_bullish_breakout_emits_buy_at_close() {
        let mut detector = BreakoutDetector::new("SPX", 60).unwrap();
        let bars = [
            bar(0, dec!(4001.0), dec!(4001.5), dec!(4000.5), dec!(4001.25)),
            bar(5, dec!(4001.25), dec!(4002.0), dec!(4001.0), dec!(4002.0)),
            bar(55, dec!(4002.0), dec!(4003.75), dec!(4001.5), dec!(4003.5)),
        ];
        for b in &bars {
            assert_eq!(detector.on_bar(b, &range()).signal_type, SignalType::Hold);
        }

        let signal = detector.on_bar(&flat(60, dec!(4003.5)), &range());
        assert_eq!(signal.signal_type, SignalType::Buy);
        assert_eq!(signal.price, Some(dec!(4003.5)));
        assert_eq!(signal.timestamp, at(0));
        assert_eq!(signal.strategy, STRATEGY_TAG);
    }

    #[test]
    fn test_bearish_breakout_emits_sell() {
        let mut detector = BreakoutDetector::new("SPX", 60).unwrap();
        detector.on_bar(&bar(0, dec!(3988), dec!(3989), dec!(3985), dec!(3986)), &range());
        detector.on_bar(&bar(30, dec!(3986), dec!(3987), dec!(3982), dec!(3983)), &range());
        let signal = detector.on_bar(&flat(61, dec!(3983)), &range());
        assert_eq!(signal.signal_type, SignalType::Sell);
        assert_eq!(signal.price, Some(dec!(3983)));
    }

    #[test]
    fn test_candle_touching_range_is_hold() {
        let mut detector = BreakoutDetector::new("SPX", 60).unwrap();
        // Rising candle whose low dips back to the range high.
        detector.on_bar(&bar(0, dec!(4001), dec!(4004), dec!(4000), dec!(4003)), &range());
        let signal = detector.on_bar(&flat(60, dec!(4003)), &range());
        assert_eq!(signal.signal_type, SignalType::Hold);
    }

    #[test]
    fn test_falling_candle_above_range_is_hold() {
        let mut detector = BreakoutDetector::new("SPX", 60).unwrap();
        detector.on_bar(&bar(0, dec!(4005), dec!(4006), dec!(4001), dec!(4002)), &range());
        let signal = detector.on_bar(&flat(60, dec!(4002)), &range());
        assert_eq!(signal.signal_type, SignalType::Hold);
    }

    #[test]
    fn test_window_start_floors_unix_time() {
        let detector = BreakoutDetector::new("SPX", 300).unwrap();
        assert_eq!(detector.window_start(at(299)), at(0));
        assert_eq!(detector.window_start(at(300)), at(300));
        assert_eq!(detector.window_start(at(301)), at(300));
    }
}
