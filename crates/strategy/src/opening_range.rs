use orb_core::{Bar, OpeningRange};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Reduces the bars of the opening window to a high/low range.
///
/// Bars are fed only once the whole window has been collected; the range is
/// computed once and never revised.
#[derive(Debug, Default)]
pub struct OpeningRangeCalculator {
    high: Option<Decimal>,
    low: Option<Decimal>,
    bars_seen: usize,
}

impl OpeningRangeCalculator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bars<'a>(&mut self, bars: impl IntoIterator<Item = &'a Bar>) {
        for bar in bars {
            self.high = Some(self.high.map_or(bar.high, |h| h.max(bar.high)));
            self.low = Some(self.low.map_or(bar.low, |l| l.min(bar.low)));
            self.bars_seen += 1;
        }
    }

    #[must_use]
    pub const fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    /// The range, or `None` when no bars were seen or the bars are inconsistent.
    #[must_use]
    pub fn calculate(&self) -> Option<OpeningRange> {
        let (Some(high), Some(low)) = (self.high, self.low) else {
            warn!("No bars collected for the opening range");
            return None;
        };
        if high < low {
            warn!(%high, %low, "Opening range high is below its low");
            return None;
        }
        debug!(%high, %low, bars = self.bars_seen, "Opening range calculated");
        Some(OpeningRange { high, low })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar(minute: i64, high: Decimal, low: Decimal) -> Bar {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap() + Duration::minutes(minute);
        Bar::new(ts, low, high, low, high, dec!(100))
    }

    #[test]
    fn test_range_spans_all_bars() {
        let bars = vec![
            bar(0, dec!(3995), dec!(3990)),
            bar(1, dec!(4000), dec!(3993)),
            bar(2, dec!(3998), dec!(3991.25)),
        ];
        let mut calc = OpeningRangeCalculator::new();
        calc.add_bars(&bars);
        assert_eq!(calc.bars_seen(), 3);
        assert_eq!(
            calc.calculate(),
            Some(OpeningRange {
                high: dec!(4000),
                low: dec!(3990)
            })
        );
    }

    #[test]
    fn test_empty_window_has_no_range() {
        let calc = OpeningRangeCalculator::new();
        assert_eq!(calc.calculate(), None);
    }

    #[test]
    fn test_single_bar_range() {
        let mut calc = OpeningRangeCalculator::new();
        calc.add_bars(&[bar(0, dec!(4001), dec!(4001))]);
        let range = calc.calculate().unwrap();
        assert_eq!(range.width(), Decimal::ZERO);
    }
}
