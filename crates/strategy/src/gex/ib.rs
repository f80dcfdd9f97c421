use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use orb_broker::{BrokerClient, BrokerError, Contract, OptionRight, RequestId, SnapshotField};
use orb_core::{AppConfig, Clock, GexConfig, GexProviderKind};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::models::{max_exposure_strike, target_expiration};
use super::{GexError, GexResolver, GexResult};

/// Generic ticks for open interest (101) and option greeks (104).
const GEX_TICKS: &str = "101,104";

/// Computes GEX from the broker's live option chain.
pub struct IbChainProvider {
    broker: Arc<BrokerClient>,
    exchange: String,
    currency: String,
    gex: GexConfig,
    market_data_timeout: Duration,
    tz: Tz,
    clock: Arc<dyn Clock>,
}

impl IbChainProvider {
    /// # Errors
    ///
    /// Fails if the instrument timezone is invalid.
    pub fn new(broker: Arc<BrokerClient>, config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self, GexError> {
        Ok(Self {
            broker,
            exchange: config.instrument.exchange.clone(),
            currency: config.instrument.currency.clone(),
            gex: config.gex.clone(),
            market_data_timeout: Duration::from_secs(config.engine.market_data_timeout_secs),
            tz: config.instrument.timezone()?,
            clock,
        })
    }

    async fn spot_price(&self, underlying: &Contract) -> Result<Decimal, GexError> {
        let snapshot = self
            .broker
            .market_snapshot(underlying, "", &[SnapshotField::Last], self.market_data_timeout)
            .await?;
        snapshot
            .last
            .or(snapshot.close)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| GexError::no_data(format!("no spot price for {}", underlying.symbol)))
    }

    /// Requests greeks and open interest for every contract, pausing between
    /// batches. Returns the request ids in order with their strikes.
    async fn request_chain(&self, contracts: &[Contract]) -> Result<Vec<(RequestId, Decimal)>, GexError> {
        let batch_size = self.gex.batch_size.max(1);
        let pause = Duration::from_millis(self.gex.batch_pause_ms);
        let mut requests = Vec::with_capacity(contracts.len());

        for (index, batch) in contracts.chunks(batch_size).enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            for contract in batch {
                match self.broker.request_market_data(contract, GEX_TICKS, false) {
                    Ok(req_id) => requests.push((req_id, contract.strike.unwrap_or_default())),
                    Err(e) => {
                        self.cancel_all(&requests);
                        return Err(e.into());
                    }
                }
            }
            debug!(batch = index + 1, requested = requests.len(), "Option market data batch sent");
        }
        Ok(requests)
    }

    fn cancel_all(&self, requests: &[(RequestId, Decimal)]) {
        for (req_id, _) in requests {
            self.broker.cancel_market_data(*req_id);
        }
    }
}

/// The listed expiration closest to `target`. Ties pick the earlier date.
fn closest_expiration(expirations: &[NaiveDate], target: NaiveDate) -> Option<NaiveDate> {
    expirations
        .iter()
        .copied()
        .min_by_key(|exp| ((*exp - target).num_days().abs(), *exp))
}

/// `quantity` consecutive strikes centred on the strike nearest `spot`.
/// `strikes` must be sorted ascending.
fn strike_window(strikes: &[Decimal], spot: Decimal, quantity: usize) -> &[Decimal] {
    let Some(nearest) = strikes
        .iter()
        .enumerate()
        .min_by_key(|(_, strike)| (**strike - spot).abs())
        .map(|(i, _)| i)
    else {
        return &[];
    };
    let quantity = quantity.clamp(1, strikes.len());
    let start = nearest.saturating_sub(quantity / 2).min(strikes.len() - quantity);
    &strikes[start..start + quantity]
}

#[async_trait]
impl GexResolver for IbChainProvider {
    async fn get_max_gamma_strike(&self, ticker: &str) -> Result<GexResult, GexError> {
        if !self.broker.is_connected() {
            return Err(BrokerError::NotConnected.into());
        }

        let underlying = Contract::underlying(ticker, &self.exchange, &self.currency);
        let details = self
            .broker
            .contract_details(&underlying)
            .await?
            .ok_or_else(|| GexError::no_data(format!("could not resolve {ticker}")))?;
        let con_id = details
            .contract
            .con_id
            .ok_or_else(|| GexError::no_data(format!("{ticker} resolved without a contract id")))?;

        let spot = self.spot_price(&details.contract).await?;
        info!(ticker, con_id, %spot, "Underlying resolved for live GEX");

        let params = self
            .broker
            .option_chain_params(&underlying.symbol, underlying.sec_type, con_id)
            .await?;
        let mut expirations: Vec<NaiveDate> = params.iter().flat_map(|p| p.expirations.iter().copied()).collect();
        expirations.sort_unstable();
        expirations.dedup();
        let mut strikes: Vec<Decimal> = params.iter().flat_map(|p| p.strikes.iter().copied()).collect();
        strikes.sort_unstable();
        strikes.dedup();

        let target = target_expiration(self.clock.as_ref(), self.tz, self.gex.days_to_expiration);
        let expiration = closest_expiration(&expirations, target)
            .ok_or_else(|| GexError::no_data(format!("no listed expirations for {ticker}")))?;
        let window = strike_window(&strikes, spot, self.gex.strikes_quantity);
        if window.is_empty() {
            return Err(GexError::no_data(format!("no listed strikes for {ticker}")));
        }
        info!(
            ticker,
            %expiration,
            %target,
            strikes = window.len(),
            from = %window[0],
            to = %window[window.len() - 1],
            "Collecting option greeks"
        );

        let contracts: Vec<Contract> = window
            .iter()
            .flat_map(|strike| [OptionRight::Call, OptionRight::Put].map(|right| (*strike, right)))
            .map(|(strike, right)| {
                Contract::option(
                    &underlying.symbol,
                    &self.exchange,
                    &self.currency,
                    expiration,
                    strike,
                    right,
                    self.gex.option_multiplier,
                )
            })
            .collect();

        let requests = self.request_chain(&contracts).await?;
        let ids: Vec<RequestId> = requests.iter().map(|(id, _)| *id).collect();
        let collected = self
            .broker
            .collect_snapshots(
                &ids,
                &[SnapshotField::OpenInterest, SnapshotField::Gamma],
                Duration::from_secs(self.gex.collection_timeout_seconds),
            )
            .await;
        self.cancel_all(&requests);
        let snapshots = collected?;

        let multiplier = f64::from(self.gex.option_multiplier);
        let mut exposure: BTreeMap<Decimal, f64> = BTreeMap::new();
        let mut usable = 0usize;
        for (req_id, strike) in &requests {
            let Some(snapshot) = snapshots.get(req_id) else { continue };
            let (Some(greeks), Some(oi)) = (snapshot.greeks, snapshot.open_interest) else {
                continue;
            };
            let Some(oi) = oi.to_f64() else { continue };
            if !greeks.gamma.is_finite() {
                continue;
            }
            usable += 1;
            *exposure.entry(*strike).or_insert(0.0) += greeks.gamma * oi * multiplier;
        }

        let Some((strike, total)) = max_exposure_strike(&exposure).filter(|(_, total)| *total > 0.0) else {
            warn!(ticker, requested = requests.len(), usable, "No usable greeks in live chain");
            return Err(GexError::no_data(format!("no gamma or open interest for {ticker} {expiration}")));
        };

        info!(ticker, %strike, total_gex = total, usable, requested = requests.len(), "Max GEX strike found");
        Ok(GexResult {
            strike,
            expiration,
            strikes: Some(strikes),
        })
    }

    fn kind(&self) -> GexProviderKind {
        GexProviderKind::Ib
    }
}
