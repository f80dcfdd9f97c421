use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use orb_core::{Clock, GexConfig, GexProviderKind, RestProviderConfig};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::models::{max_exposure_strike, target_expiration, GexbotResponse};
use super::{fetch_json, http_client, GexError, GexResolver, GexResult};

/// GEX distribution from gexbot.com.
///
/// Total exposure per strike is `|short_gamma| + |long_gamma|`.
pub struct GexbotProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    days_to_expiration: i64,
    tz: Tz,
    clock: Arc<dyn Clock>,
}

impl GexbotProvider {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(
        rest: &RestProviderConfig,
        gex: &GexConfig,
        tz: Tz,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GexError> {
        Ok(Self {
            http: http_client(gex.request_timeout_seconds)?,
            base_url: rest.base_url.trim_end_matches('/').to_string(),
            api_key: rest.api_key.clone(),
            days_to_expiration: gex.days_to_expiration,
            tz,
            clock,
        })
    }
}

#[async_trait]
impl GexResolver for GexbotProvider {
    async fn get_max_gamma_strike(&self, ticker: &str) -> Result<GexResult, GexError> {
        let expiration = target_expiration(self.clock.as_ref(), self.tz, self.days_to_expiration);
        let exp = expiration.format("%Y-%m-%d").to_string();
        info!(ticker, expiration = %exp, "Requesting gexbot distribution");

        let request = self
            .http
            .get(format!("{}/gex/distribution", self.base_url))
            .query(&[("ticker", ticker), ("exp", exp.as_str()), ("api_key", self.api_key.as_str())]);
        let response: GexbotResponse = fetch_json(request).await?;

        if !response.success || response.data.is_empty() {
            warn!(ticker, expiration = %exp, success = response.success, "gexbot returned no data");
            return Err(GexError::no_data(format!("gexbot has no data for {ticker} on {exp}")));
        }

        let mut exposure = BTreeMap::new();
        for row in &response.data {
            *exposure.entry(row.strike).or_insert(0.0) += row.short_gamma.abs() + row.long_gamma.abs();
        }
        let (strike, total) = max_exposure_strike(&exposure)
            .filter(|(strike, total)| *total > 0.0 && *strike > Decimal::ZERO)
            .ok_or_else(|| GexError::no_data(format!("no positive exposure for {ticker} on {exp}")))?;

        info!(ticker, %strike, total_gex = total, "Max GEX strike found");
        Ok(GexResult {
            strike,
            expiration,
            strikes: None,
        })
    }

    fn kind(&self) -> GexProviderKind {
        GexProviderKind::Gexbot
    }
}
