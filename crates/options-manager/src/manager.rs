//! Order lifecycle manager.
//!
//! Owns the active-position map. Status events reach it only through
//! [`OrderManager::process_status_updates`], which drains the broker's
//! status queue from the caller's task, so no locking is needed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use orb_broker::{
    BrokerClient, BrokerError, Contract, MarketSnapshot, Order, OrderAction, OrderKind, OrderState,
    OrderStatusEvent, RequestId, SnapshotField, TimeInForce,
};
use orb_core::{AppConfig, EntryOrderType, Signal};
use orb_strategy::GexResult;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::bracket::{build_bracket, stop_order};
use crate::decision::{decide_option_right, select_atm_strike};
use crate::stops::check_trailing_stop;
use crate::ticks::round_to_tick;
use crate::types::{TrackedPosition, TradeError};

pub struct OrderManager {
    broker: Arc<BrokerClient>,
    config: Arc<AppConfig>,
    market_data_timeout: Duration,
    positions: BTreeMap<RequestId, TrackedPosition>,
}

impl OrderManager {
    pub fn new(broker: Arc<BrokerClient>, config: Arc<AppConfig>) -> Self {
        let market_data_timeout = Duration::from_secs(config.engine.market_data_timeout_secs);
        Self {
            broker,
            config,
            market_data_timeout,
            positions: BTreeMap::new(),
        }
    }

    /// Chooses, prices and submits a bracket for `signal`. Returns the parent
    /// order id, under which the position is tracked.
    ///
    /// # Errors
    ///
    /// Any [`TradeError`] aborts the trade before the first order is sent,
    /// except broker failures while the three orders are being placed.
    pub async fn place_trade(
        &mut self,
        signal: &Signal,
        spot: Decimal,
        gex: &GexResult,
    ) -> Result<RequestId, TradeError> {
        info!(
            signal = %signal.signal_type,
            %spot,
            gex_strike = %gex.strike,
            expiration = %gex.expiration,
            "Processing trade signal"
        );

        let right = decide_option_right(signal.signal_type, spot, gex.strike)?;
        let strikes = match gex.strikes.as_deref() {
            Some(strikes) if !strikes.is_empty() => strikes.to_vec(),
            _ => self.chain_strikes(gex).await?,
        };
        let strike = select_atm_strike(spot, &strikes)?;

        let instrument = &self.config.instrument;
        let requested = Contract::option(
            &instrument.ticker,
            &instrument.exchange,
            &instrument.currency,
            gex.expiration,
            strike,
            right,
            self.config.gex.option_multiplier,
        );
        let details = self
            .broker
            .contract_details(&requested)
            .await?
            .ok_or_else(|| TradeError::UnresolvedContract(requested.display_name()))?;
        let contract = details.contract;
        info!(contract = %contract.display_name(), con_id = ?contract.con_id, min_tick = %details.min_tick, "Option contract resolved");

        let price = self.option_price(&contract).await?;
        let tm = &self.config.trade_management;
        let entry_tick = if details.min_tick > Decimal::ZERO {
            details.min_tick
        } else {
            tm.tick_size.tick_for(price)
        };
        let entry = round_to_tick(price, entry_tick);
        info!(%price, %entry_tick, %entry, "Entry price rounded");

        let parent_id = self.broker.next_request_id(3);
        let execution = &self.config.trade_execution;
        let parent = Order {
            order_id: parent_id,
            parent_id: None,
            action: OrderAction::Buy,
            kind: match execution.order_defaults.entry_order_type {
                EntryOrderType::Limit => OrderKind::Limit { price: entry },
                EntryOrderType::Market => OrderKind::Market,
            },
            quantity: execution.total_quantity,
            tif: TimeInForce::Day,
            transmit: false,
        };
        let bracket = build_bracket(parent, entry, tm)?;
        let position = TrackedPosition {
            parent_order_id: parent_id,
            take_profit_order_id: bracket.take_profit.order_id,
            stop_loss_order_id: bracket.stop_loss.order_id,
            contract: contract.clone(),
            quantity: bracket.parent.quantity,
            stop_price: bracket.stop_loss.price().unwrap_or_default(),
            tick_size: entry_tick,
            avg_cost: None,
            milestone_level: 0,
        };

        info!(
            parent = parent_id,
            take_profit = position.take_profit_order_id,
            stop_loss = position.stop_loss_order_id,
            "Submitting bracket"
        );
        let mut staged = Vec::with_capacity(3);
        for order in bracket.into_vec() {
            if let Err(e) = self.broker.place_order(&contract, &order) {
                warn!(
                    parent = parent_id,
                    failed = order.order_id,
                    staged = ?staged,
                    error = %e,
                    "Bracket submission failed, cancelling staged orders"
                );
                for order_id in staged {
                    self.broker.cancel_order(order_id);
                }
                return Err(e.into());
            }
            staged.push(order.order_id);
        }

        self.positions.insert(parent_id, position);
        info!(parent = parent_id, active = self.positions.len(), "Position tracked");
        Ok(parent_id)
    }

    /// Strikes listed by the broker for the GEX expiration, or all listed
    /// strikes when no chain carries that expiration.
    async fn chain_strikes(&self, gex: &GexResult) -> Result<Vec<Decimal>, TradeError> {
        let instrument = &self.config.instrument;
        let underlying = Contract::underlying(&instrument.ticker, &instrument.exchange, &instrument.currency);
        let con_id = self
            .broker
            .contract_details(&underlying)
            .await?
            .and_then(|d| d.contract.con_id)
            .ok_or_else(|| TradeError::UnresolvedContract(underlying.display_name()))?;
        let params = self
            .broker
            .option_chain_params(&underlying.symbol, underlying.sec_type, con_id)
            .await?;

        let matching: Vec<_> = params
            .iter()
            .filter(|p| p.expirations.contains(&gex.expiration))
            .collect();
        let chains = if matching.is_empty() { params.iter().collect() } else { matching };
        let mut strikes: Vec<Decimal> = chains.iter().flat_map(|p| p.strikes.iter().copied()).collect();
        strikes.sort_unstable();
        strikes.dedup();
        info!(count = strikes.len(), expiration = %gex.expiration, "Strike universe fetched from broker");
        Ok(strikes)
    }

    async fn option_price(&self, contract: &Contract) -> Result<Decimal, TradeError> {
        let snapshot = self
            .broker
            .market_snapshot(contract, "", &[SnapshotField::Ask], self.market_data_timeout)
            .await?;
        pick_price(&snapshot).ok_or_else(|| TradeError::NoMarketPrice(contract.display_name()))
    }

    /// Drains the order-status queue and applies every event.
    pub async fn process_status_updates(&mut self) {
        for event in self.broker.drain_order_statuses().await {
            self.apply_status(&event);
        }
    }

    /// Folds one order-status event into the tracked positions.
    pub fn apply_status(&mut self, event: &OrderStatusEvent) {
        let order_id = event.order_id;

        if let Some(position) = self.positions.get_mut(&order_id) {
            match &event.status {
                OrderState::Filled if position.avg_cost.is_none() => {
                    if event.avg_fill_price > Decimal::ZERO {
                        position.avg_cost = Some(event.avg_fill_price);
                        info!(parent = order_id, avg_cost = %event.avg_fill_price, "Parent filled");
                    } else {
                        warn!(parent = order_id, avg_fill_price = %event.avg_fill_price, "Parent filled without a usable price");
                    }
                }
                OrderState::Filled => debug!(parent = order_id, "Repeated parent fill ignored"),
                status if status.is_terminal() => {
                    warn!(parent = order_id, %status, "Parent order ended without a fill");
                    self.positions.remove(&order_id);
                }
                status => debug!(parent = order_id, %status, "Parent status"),
            }
            return;
        }

        let Some(parent_id) = self
            .positions
            .values()
            .find(|p| p.is_child(order_id))
            .map(|p| p.parent_order_id)
        else {
            debug!(order_id, status = %event.status, "Status for untracked order");
            return;
        };

        if event.status.is_terminal() {
            self.positions.remove(&parent_id);
            info!(
                parent = parent_id,
                child = order_id,
                status = %event.status,
                active = self.positions.len(),
                "Position closed"
            );
        } else {
            debug!(parent = parent_id, child = order_id, status = %event.status, "Child status");
        }
    }

    /// Periodic management: apply queued status events, recover missing fill
    /// prices, then trail stops on filled positions.
    ///
    /// # Errors
    ///
    /// Fails only when positions need market data and the broker is not
    /// connected. Per-position failures are logged and skipped.
    pub async fn manage_positions(&mut self) -> Result<(), TradeError> {
        self.process_status_updates().await;
        if self.positions.is_empty() {
            return Ok(());
        }
        if !self.broker.is_connected() {
            return Err(BrokerError::NotConnected.into());
        }

        if self.positions.values().any(|p| p.avg_cost.is_none()) {
            self.recover_fill_prices().await;
        }

        let snapshot: Vec<TrackedPosition> = self.positions.values().cloned().collect();
        for position in snapshot {
            if position.avg_cost.is_none() {
                continue;
            }
            let current = match self.option_price(&position.contract).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(parent = position.parent_order_id, error = %e, "Cannot price position for trailing");
                    continue;
                }
            };
            let Some(adjustment) = check_trailing_stop(&position, current, &self.config.trade_management) else {
                continue;
            };

            let order = stop_order(
                position.stop_loss_order_id,
                position.parent_order_id,
                adjustment.stop_price,
                position.quantity,
            );
            match self.broker.place_order(&position.contract, &order) {
                Ok(_) => {
                    if let Some(tracked) = self.positions.get_mut(&position.parent_order_id) {
                        tracked.stop_price = adjustment.stop_price;
                        tracked.milestone_level = adjustment.milestone_level;
                    }
                    info!(
                        parent = position.parent_order_id,
                        stop_loss = position.stop_loss_order_id,
                        stop_price = %adjustment.stop_price,
                        level = adjustment.milestone_level,
                        "Stop loss modified"
                    );
                }
                Err(e) => error!(parent = position.parent_order_id, error = %e, "Stop modification failed"),
            }
        }
        Ok(())
    }

    /// Fills in missing average costs from the broker's position list.
    async fn recover_fill_prices(&mut self) {
        let entries = match self.broker.positions().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Position list unavailable for fill recovery");
                return;
            }
        };
        let default_multiplier = self.config.gex.option_multiplier;
        for position in self.positions.values_mut().filter(|p| p.avg_cost.is_none()) {
            let Some(entry) = entries
                .iter()
                .find(|e| e.size > Decimal::ZERO && e.contract.same_instrument(&position.contract))
            else {
                continue;
            };
            let multiplier = Decimal::from(position.contract.multiplier.unwrap_or(default_multiplier).max(1));
            let avg_cost = entry.avg_cost / multiplier;
            if avg_cost > Decimal::ZERO {
                position.avg_cost = Some(avg_cost);
                info!(parent = position.parent_order_id, %avg_cost, "Average cost recovered from positions");
            }
        }
    }

    #[must_use]
    pub fn has_active_positions(&self) -> bool {
        !self.positions.is_empty()
    }

    #[must_use]
    pub fn position(&self, parent_order_id: RequestId) -> Option<&TrackedPosition> {
        self.positions.get(&parent_order_id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &TrackedPosition> {
        self.positions.values()
    }
}

/// Ask, then last, then close; the first positive value wins.
fn pick_price(snapshot: &MarketSnapshot) -> Option<Decimal> {
    [snapshot.ask, snapshot.last, snapshot.close]
        .into_iter()
        .flatten()
        .find(|p| *p > Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use orb_broker::paper::{PaperBroker, PaperScript};
    use orb_broker::{ClientSettings, OptionRight};
    use orb_core::ConfigLoader;
    use rust_decimal_macros::dec;

    const CONFIG: &str = r#"
[connection]
host = "127.0.0.1"
port = 4002
client_id = 1

[instrument]
ticker = "SPX"
exchange = "CBOE"
currency = "USD"
exchange_timezone = "America/New_York"

[opening_range]
market_open_time = "09:30:00"
duration_minutes = 15
bar_size = "1 min"
wait_buffer_seconds = 5
historical_data_timeout_seconds = 10

[breakout]
bar_size_seconds = 60

[gex]
provider = "ib"
days_to_expiration = 0
strikes_quantity = 40
option_multiplier = 100

[trade_management]
take_profit_pct = 50
stop_loss_pct = 20

[trade_management.trailing_stop]
activation_profit_pct = 10
trail_pct = 10

[trade_execution]
total_quantity = 1
"#;

    fn manager() -> OrderManager {
        let config = Arc::new(ConfigLoader::from_toml_str(CONFIG).unwrap());
        let settings = ClientSettings::from_config(&config.connection, &config.engine);
        let (_paper, client) = PaperBroker::client(PaperScript::default(), settings);
        OrderManager::new(Arc::new(client), config)
    }

    fn track(manager: &mut OrderManager, parent: RequestId) {
        manager.positions.insert(
            parent,
            TrackedPosition {
                parent_order_id: parent,
                take_profit_order_id: parent + 1,
                stop_loss_order_id: parent + 2,
                contract: Contract::option(
                    "SPX",
                    "CBOE",
                    "USD",
                    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                    dec!(4000),
                    OptionRight::Call,
                    100,
                ),
                quantity: 1,
                stop_price: dec!(1.60),
                tick_size: dec!(0.05),
                avg_cost: None,
                milestone_level: 0,
            },
        );
    }

    fn status(order_id: RequestId, status: OrderState, avg: Decimal) -> OrderStatusEvent {
        OrderStatusEvent {
            order_id,
            status,
            filled: Decimal::ONE,
            remaining: Decimal::ZERO,
            avg_fill_price: avg,
        }
    }

    #[tokio::test]
    async fn test_first_parent_fill_records_avg_cost() {
        let mut manager = manager();
        track(&mut manager, 100);

        manager.apply_status(&status(100, OrderState::Submitted, Decimal::ZERO));
        assert_eq!(manager.position(100).unwrap().avg_cost, None);

        manager.apply_status(&status(100, OrderState::Filled, dec!(2.00)));
        manager.apply_status(&status(100, OrderState::Filled, dec!(2.50)));
        assert_eq!(manager.position(100).unwrap().avg_cost, Some(dec!(2.00)));
    }

    #[tokio::test]
    async fn test_zero_fill_price_leaves_avg_unset() {
        let mut manager = manager();
        track(&mut manager, 100);
        manager.apply_status(&status(100, OrderState::Filled, Decimal::ZERO));
        assert_eq!(manager.position(100).unwrap().avg_cost, None);
    }

    #[tokio::test]
    async fn test_child_terminal_status_removes_once() {
        let mut manager = manager();
        track(&mut manager, 100);
        track(&mut manager, 200);

        manager.apply_status(&status(102, OrderState::PreSubmitted, Decimal::ZERO));
        assert!(manager.position(100).is_some());

        manager.apply_status(&status(101, OrderState::Filled, dec!(3.00)));
        assert!(manager.position(100).is_none());
        // The sibling's cancellation arrives after the position is gone.
        manager.apply_status(&status(102, OrderState::Cancelled, Decimal::ZERO));
        assert!(manager.position(200).is_some());
        assert!(manager.has_active_positions());

        manager.apply_status(&status(202, OrderState::Inactive, Decimal::ZERO));
        assert!(!manager.has_active_positions());
    }

    #[tokio::test]
    async fn test_parent_rejection_removes_position() {
        let mut manager = manager();
        track(&mut manager, 100);
        manager.apply_status(&status(100, OrderState::Rejected, Decimal::ZERO));
        assert!(!manager.has_active_positions());
    }

    #[test]
    fn test_price_preference() {
        let snapshot = MarketSnapshot {
            ask: Some(Decimal::ZERO),
            last: Some(dec!(1.55)),
            close: Some(dec!(1.40)),
            ..MarketSnapshot::default()
        };
        assert_eq!(pick_price(&snapshot), Some(dec!(1.55)));

        let snapshot = MarketSnapshot {
            ask: Some(dec!(1.60)),
            ..snapshot
        };
        assert_eq!(pick_price(&snapshot), Some(dec!(1.60)));

        let snapshot = MarketSnapshot {
            close: Some(dec!(1.40)),
            ..MarketSnapshot::default()
        };
        assert_eq!(pick_price(&snapshot), Some(dec!(1.40)));
        assert_eq!(pick_price(&MarketSnapshot::default()), None);
    }
}
