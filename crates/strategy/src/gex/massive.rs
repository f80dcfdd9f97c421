use std::collections::BTreeMap;

use async_trait::async_trait;
use orb_core::{GexConfig, GexProviderKind, RestProviderConfig};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::models::{max_exposure_strike, MassiveResponse};
use super::{fetch_json, http_client, GexError, GexResolver, GexResult};

/// Option chain with greeks from the massive.com data feed.
pub struct MassiveDataProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    days_to_expiration: i64,
    strikes_quantity: usize,
    option_multiplier: u32,
}

impl MassiveDataProvider {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(rest: &RestProviderConfig, gex: &GexConfig) -> Result<Self, GexError> {
        Ok(Self {
            http: http_client(gex.request_timeout_seconds)?,
            base_url: rest.base_url.trim_end_matches('/').to_string(),
            api_key: rest.api_key.clone(),
            days_to_expiration: gex.days_to_expiration,
            strikes_quantity: gex.strikes_quantity,
            option_multiplier: gex.option_multiplier,
        })
    }
}

#[async_trait]
impl GexResolver for MassiveDataProvider {
    async fn get_max_gamma_strike(&self, ticker: &str) -> Result<GexResult, GexError> {
        info!(ticker, dte = self.days_to_expiration, "Requesting massive.com option chain");

        let request = self
            .http
            .get(format!("{}/options/chain", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[
                ("ticker", ticker.to_string()),
                ("days_to_expiration", self.days_to_expiration.to_string()),
                ("strikes_quantity", self.strikes_quantity.to_string()),
                ("fields", "greeks,openInterest".to_string()),
            ]);
        let response: MassiveResponse = fetch_json(request).await?;

        let multiplier = f64::from(self.option_multiplier);
        let mut exposure: BTreeMap<Decimal, f64> = BTreeMap::new();
        for option in &response.options {
            let (Some(gamma), Some(oi)) = (option.greeks.as_ref().and_then(|g| g.gamma), option.open_interest) else {
                debug!(strike = %option.strike, kind = %option.option_type, "Skipping option without gamma or open interest");
                continue;
            };
            // u64 open interest fits f64 exactly below 2^53.
            #[allow(clippy::cast_precision_loss)]
            let gex = gamma * oi as f64 * multiplier;
            *exposure.entry(option.strike).or_insert(0.0) += gex;
        }

        let Some((strike, total)) = max_exposure_strike(&exposure) else {
            warn!(ticker, "No usable options in massive.com response");
            return Err(GexError::no_data(format!("massive.com returned no usable options for {ticker}")));
        };

        info!(ticker, %strike, total_gex = total, expiration = %response.expiration, "Max GEX strike found");
        Ok(GexResult {
            strike,
            expiration: response.expiration,
            strikes: Some(exposure.into_keys().collect()),
        })
    }

    fn kind(&self) -> GexProviderKind {
        GexProviderKind::MassiveData
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> MassiveDataProvider {
        let gex = GexConfig {
            provider: GexProviderKind::MassiveData,
            days_to_expiration: 0,
            strikes_quantity: 40,
            option_multiplier: 100,
            batch_size: 50,
            batch_pause_ms: 0,
            collection_timeout_seconds: 5,
            request_timeout_seconds: 5,
            providers: Default::default(),
        };
        let rest = RestProviderConfig {
            base_url: server.uri(),
            api_key: "token".to_string(),
        };
        MassiveDataProvider::new(&rest, &gex).unwrap()
    }

    #[tokio::test]
    async fn test_sums_calls_and_puts_per_strike() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/options/chain"))
            .and(header("Authorization", "Bearer token"))
            .and(query_param("ticker", "SPX"))
            .and(query_param("days_to_expiration", "0"))
            .and(query_param("strikes_quantity", "40"))
            .and(query_param("fields", "greeks,openInterest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expiration": "2026-03-02",
                "options": [
                    {"strike": 3990.0, "type": "call", "openInterest": 1000, "greeks": {"gamma": 0.010}},
                    {"strike": 4000.0, "type": "call", "openInterest": 800, "greeks": {"gamma": 0.010}},
                    {"strike": 4000.0, "type": "put", "openInterest": 600, "greeks": {"gamma": 0.010}},
                    {"strike": 4010.0, "type": "put", "openInterest": null, "greeks": {"gamma": 0.5}}
                ]
            })))
            .mount(&server)
            .await;

        let result = provider(&server).get_max_gamma_strike("SPX").await.unwrap();
        assert_eq!(result.strike, dec!(4000));
        assert_eq!(result.expiration_code(), "20260302");
        assert_eq!(result.strikes, Some(vec![dec!(3990), dec!(4000)]));
    }

    #[tokio::test]
    async fn test_empty_chain_is_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/options/chain"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expiration": "2026-03-02",
                "options": []
            })))
            .mount(&server)
            .await;

        let err = provider(&server).get_max_gamma_strike("SPX").await.unwrap_err();
        assert!(matches!(err, GexError::NoData(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).get_max_gamma_strike("SPX").await.unwrap_err();
        assert!(matches!(err, GexError::Status { status: 503, .. }));
    }
}
