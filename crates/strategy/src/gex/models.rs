use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use chrono_tz::Tz;
use orb_core::Clock;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Outcome of a GEX resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GexResult {
    /// Strike with the largest gamma exposure.
    pub strike: Decimal,
    pub expiration: NaiveDate,
    /// Strikes listed for `expiration`, when the provider knows them.
    pub strikes: Option<Vec<Decimal>>,
}

impl GexResult {
    /// Expiration in the broker's `YYYYMMDD` notation.
    #[must_use]
    pub fn expiration_code(&self) -> String {
        self.expiration.format("%Y%m%d").to_string()
    }
}

/// Expiration `days_to_expiration` days after the exchange-local date of `now`.
pub(crate) fn target_expiration(clock: &dyn Clock, tz: Tz, days_to_expiration: i64) -> NaiveDate {
    let today = clock.now().with_timezone(&tz).date_naive();
    let days = Days::new(days_to_expiration.unsigned_abs());
    let shifted = if days_to_expiration >= 0 {
        today.checked_add_days(days)
    } else {
        today.checked_sub_days(days)
    };
    shifted.unwrap_or(today)
}

/// Strike with the greatest total exposure. Ties keep the lowest strike.
pub(crate) fn max_exposure_strike(exposure: &BTreeMap<Decimal, f64>) -> Option<(Decimal, f64)> {
    exposure
        .iter()
        .fold(None, |best: Option<(Decimal, f64)>, (strike, gex)| match best {
            Some((_, best_gex)) if *gex <= best_gex => best,
            _ => Some((*strike, *gex)),
        })
}

#[derive(Debug, Deserialize)]
pub struct GexbotStrike {
    pub strike: Decimal,
    pub long_gamma: f64,
    pub short_gamma: f64,
}

#[derive(Debug, Deserialize)]
pub struct GexbotResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<GexbotStrike>,
}

#[derive(Debug, Deserialize)]
pub struct MassiveGreeks {
    pub gamma: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct MassiveOption {
    pub strike: Decimal,
    #[serde(rename = "type")]
    pub option_type: String,
    #[serde(rename = "openInterest")]
    pub open_interest: Option<u64>,
    pub greeks: Option<MassiveGreeks>,
}

#[derive(Debug, Deserialize)]
pub struct MassiveResponse {
    /// "YYYY-MM-DD".
    pub expiration: NaiveDate,
    #[serde(default)]
    pub options: Vec<MassiveOption>,
}
