//! Wall-clock access and opening-window arithmetic in the exchange timezone.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;

use crate::config::{ConfigError, OpeningRangeConfig};

/// Source of "now". The engine never calls `Utc::now()` directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable instant. Used for replays and tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// The opening window of one session, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpeningWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl OpeningWindow {
    /// Builds the window for the exchange-local trading date containing `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the open time does not exist on that
    /// date in `tz` (a DST gap).
    pub fn for_session(
        now: DateTime<Utc>,
        tz: Tz,
        config: &OpeningRangeConfig,
    ) -> Result<Self, ConfigError> {
        let local_date = now.with_timezone(&tz).date_naive();
        let start = local_instant(tz, local_date.and_time(config.market_open_time))?;
        let end = start + Duration::minutes(i64::from(config.duration_minutes));
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn duration_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }

    /// Time left until the window closes, or `None` once it has.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.end - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

fn local_instant(tz: Tz, local: chrono::NaiveDateTime) -> Result<DateTime<Utc>, ConfigError> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ConfigError::Invalid {
            field: "opening_range.market_open_time",
            reason: format!("{local} does not exist in {tz}"),
        })
}

/// Formats an instant as `yyyymmdd hh:mm:ss <tz>`, the broker's end-time notation.
#[must_use]
pub fn format_exchange_time(instant: DateTime<Utc>, tz: Tz) -> String {
    format!(
        "{} {}",
        instant.with_timezone(&tz).format("%Y%m%d %H:%M:%S"),
        tz.name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn config() -> OpeningRangeConfig {
        OpeningRangeConfig {
            market_open_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            duration_minutes: 30,
            bar_size: "1 min".to_string(),
            wait_buffer_seconds: 5,
            historical_data_timeout_seconds: 20,
        }
    }

    #[test]
    fn window_is_anchored_in_exchange_timezone() {
        // 2026-03-02 is before the US DST switch: New York is UTC-5.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        let window = OpeningWindow::for_session(now, chrono_tz::America::New_York, &config()).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());
        assert_eq!(window.duration_seconds(), 1800);
    }

    #[test]
    fn window_follows_daylight_saving() {
        // 2026-07-01: New York is UTC-4.
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let window = OpeningWindow::for_session(now, chrono_tz::America::New_York, &config()).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 7, 1, 13, 30, 0).unwrap());
    }

    #[test]
    fn remaining_is_none_after_close() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 14, 45, 0).unwrap();
        let window = OpeningWindow::for_session(now, chrono_tz::America::New_York, &config()).unwrap();
        assert_eq!(window.remaining(now), Some(std::time::Duration::from_secs(900)));
        assert_eq!(window.remaining(window.end), None);
        assert_eq!(window.remaining(window.end + Duration::seconds(1)), None);
    }

    #[test]
    fn fixed_clock_can_be_moved() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        let clock = FixedClock::new(t0);
        assert_eq!(clock.now(), t0);
        clock.set(t0 + Duration::minutes(5));
        assert_eq!(clock.now(), t0 + Duration::minutes(5));
    }

    #[test]
    fn formats_local_time() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        assert_eq!(
            format_exchange_time(t, chrono_tz::America::New_York),
            "20260302 10:00:00 America/New_York"
        );
    }
}
