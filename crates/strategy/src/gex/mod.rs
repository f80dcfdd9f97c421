//! Gamma-exposure strike resolution.
//!
//! Every provider answers one question: for a ticker, which strike carries
//! the largest gamma exposure, for which expiration, and (optionally) which
//! strikes exist. The provider is chosen once at startup by [`create_resolver`].

pub mod factory;
pub mod gexbot;
pub mod ib;
pub mod massive;
pub mod models;

use async_trait::async_trait;
use orb_broker::BrokerError;
use orb_core::{ConfigError, GexProviderKind};
use thiserror::Error;

pub use factory::create_resolver;
pub use gexbot::GexbotProvider;
pub use ib::IbChainProvider;
pub use massive::MassiveDataProvider;
pub use models::GexResult;

/// Errors that can occur while resolving the max-gamma strike.
#[derive(Debug, Error)]
pub enum GexError {
    /// HTTP transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// Response body did not match the expected schema.
    #[error("unexpected response: {0}")]
    Parse(String),

    /// Provider answered but had nothing usable.
    #[error("no GEX data: {0}")]
    NoData(String),

    /// Broker call failed (live-chain provider).
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Provider misconfigured.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<reqwest::Error> for GexError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl GexError {
    pub fn no_data(reason: impl Into<String>) -> Self {
        Self::NoData(reason.into())
    }
}

/// Strategy interface for GEX providers.
#[async_trait]
pub trait GexResolver: Send + Sync {
    /// Strike with the maximum gamma exposure for `ticker`.
    ///
    /// # Errors
    ///
    /// Returns a [`GexError`] when the provider cannot produce a strike.
    /// A provider never reports "no data" as a zero strike.
    async fn get_max_gamma_strike(&self, ticker: &str) -> Result<GexResult, GexError>;

    fn kind(&self) -> GexProviderKind;
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, GexError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| GexError::Network(format!("failed to build HTTP client: {e}")))
}

/// Sends `request` and decodes a JSON body, mapping non-success statuses.
pub(crate) async fn fetch_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, GexError> {
    let response = request
        .header("Accept", "application/json")
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GexError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| GexError::Parse(e.to_string()))
}
