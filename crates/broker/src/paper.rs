//! Paper trading transport.
//!
//! An in-process [`BrokerTransport`] that answers requests from a script
//! instead of a broker session. Real-time bars are paced from a background
//! task; everything else is answered immediately through the event sink.
//! Bracket groups are filled at the parent's limit price when the group is
//! transmitted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use orb_core::Bar;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlation::{BrokerClient, ClientSettings};
use crate::error::{BrokerError, Result};
use crate::events::{event_channel, EventSink};
use crate::transport::BrokerTransport;
use crate::types::{
    Contract, ContractDetails, OptionChainParams, OptionGreeks, OptionRight, Order, OrderKind,
    OrderState, OrderStatusEvent, PositionEntry, PriceField, RequestId, SecurityType, Tick,
};

/// Scripted greeks and open interest for one option.
#[derive(Debug, Clone)]
pub struct PaperOptionData {
    pub strike: Decimal,
    pub right: OptionRight,
    pub gamma: f64,
    pub open_interest: Decimal,
}

/// What the paper broker answers with.
#[derive(Debug, Clone)]
pub struct PaperScript {
    pub next_valid_id: RequestId,
    /// The first `connect_failures` connection attempts fail.
    pub connect_failures: u32,
    pub historical_bars: Vec<Bar>,
    pub realtime_bars: Vec<Bar>,
    pub bar_interval: Duration,
    /// Drop the connection once this many real-time bars have been sent.
    pub disconnect_after_bars: Option<usize>,
    pub underlying_price: Decimal,
    /// Quoted as ask, last and close for every option.
    pub option_price: Decimal,
    pub min_tick: Decimal,
    pub chain_expirations: Vec<NaiveDate>,
    pub chain_strikes: Vec<Decimal>,
    pub option_data: Vec<PaperOptionData>,
    /// Answer option contract lookups with no match.
    pub reject_options: bool,
    pub fill_entries: bool,
    /// When false, parent fills report a zero average price.
    pub report_fill_price: bool,
    /// Refuse take-profit and stop-loss orders.
    pub reject_child_orders: bool,
}

impl Default for PaperScript {
    fn default() -> Self {
        Self {
            next_valid_id: 1,
            connect_failures: 0,
            historical_bars: Vec::new(),
            realtime_bars: Vec::new(),
            bar_interval: Duration::from_secs(5),
            disconnect_after_bars: None,
            underlying_price: Decimal::ZERO,
            option_price: Decimal::ZERO,
            min_tick: dec!(0.05),
            chain_expirations: Vec::new(),
            chain_strikes: Vec::new(),
            option_data: Vec::new(),
            reject_options: false,
            fill_entries: true,
            report_fill_price: true,
            reject_child_orders: false,
        }
    }
}

/// State shared with the bar-streaming tasks.
#[derive(Debug)]
struct Shared {
    sink: EventSink,
    script: Mutex<PaperScript>,
    connected: AtomicBool,
    bar_cursor: AtomicUsize,
    exhausted: AtomicBool,
    exhausted_notify: Notify,
}

impl Shared {
    fn drop_connection(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.sink.connection_closed();
        }
    }

    fn mark_exhausted(&self) {
        if !self.exhausted.swap(true, Ordering::SeqCst) {
            info!("Paper real-time bars exhausted");
        }
        self.exhausted_notify.notify_waiters();
    }

    async fn stream_bars(self: Arc<Self>, req_id: RequestId) {
        loop {
            let interval = self.script.lock().bar_interval;
            tokio::time::sleep(interval).await;
            if !self.connected.load(Ordering::SeqCst) {
                return;
            }

            let (bar, disconnect_now) = {
                let mut script = self.script.lock();
                let index = self.bar_cursor.load(Ordering::SeqCst);
                let Some(bar) = script.realtime_bars.get(index).cloned() else {
                    drop(script);
                    self.mark_exhausted();
                    return;
                };
                self.bar_cursor.store(index + 1, Ordering::SeqCst);
                let disconnect_now = script.disconnect_after_bars == Some(index + 1);
                if disconnect_now {
                    script.disconnect_after_bars = None;
                }
                (bar, disconnect_now)
            };

            self.sink.realtime_bar(req_id, bar);
            if disconnect_now {
                warn!(req_id, "Paper broker dropping connection");
                self.drop_connection();
                return;
            }
        }
    }
}

pub struct PaperBroker {
    shared: Arc<Shared>,
    connect_attempts: AtomicU32,
    disconnect_calls: AtomicU32,
    next_con_id: AtomicI64,
    streams: Mutex<HashMap<RequestId, JoinHandle<()>>>,
    market_requests: Mutex<Vec<RequestId>>,
    placed: Mutex<Vec<(Contract, Order)>>,
    working: Mutex<HashMap<RequestId, (Contract, Order)>>,
    positions: Mutex<Vec<PositionEntry>>,
}

impl PaperBroker {
    pub fn new(sink: EventSink, script: PaperScript) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                script: Mutex::new(script),
                connected: AtomicBool::new(false),
                bar_cursor: AtomicUsize::new(0),
                exhausted: AtomicBool::new(false),
                exhausted_notify: Notify::new(),
            }),
            connect_attempts: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            next_con_id: AtomicI64::new(1000),
            streams: Mutex::new(HashMap::new()),
            market_requests: Mutex::new(Vec::new()),
            placed: Mutex::new(Vec::new()),
            working: Mutex::new(HashMap::new()),
            positions: Mutex::new(Vec::new()),
        }
    }

    /// Builds a paper broker and a client wired to it.
    pub fn client(script: PaperScript, settings: ClientSettings) -> (Arc<Self>, BrokerClient) {
        let (sink, queues) = event_channel();
        let paper = Arc::new(Self::new(sink, script));
        let client = BrokerClient::new(paper.clone(), queues, settings);
        (paper, client)
    }

    pub fn set_option_price(&self, price: Decimal) {
        self.shared.script.lock().option_price = price;
    }

    /// Simulates the broker closing the session.
    pub fn drop_connection(&self) {
        self.abort_streams();
        self.shared.drop_connection();
    }

    /// Delivers a real-time bar tagged with an arbitrary request id.
    pub fn emit_realtime_bar(&self, req_id: RequestId, bar: Bar) {
        self.shared.sink.realtime_bar(req_id, bar);
    }

    /// Reports a terminal or intermediate status for a working order.
    pub fn report_status(&self, order_id: RequestId, status: OrderState, avg_fill_price: Decimal) {
        let quantity = self
            .working
            .lock()
            .get(&order_id)
            .map_or(Decimal::ZERO, |(_, o)| Decimal::from(o.quantity));
        if status.is_terminal() {
            self.working.lock().remove(&order_id);
        }
        let filled = if status == OrderState::Filled {
            quantity
        } else {
            Decimal::ZERO
        };
        self.shared.sink.order_status(OrderStatusEvent {
            order_id,
            status,
            filled,
            remaining: quantity - filled,
            avg_fill_price,
        });
    }

    /// Resolves once the scripted real-time bars have all been sent.
    pub async fn wait_exhausted(&self) {
        loop {
            let notified = self.shared.exhausted_notify.notified();
            if self.shared.exhausted.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    #[must_use]
    pub fn placed_orders(&self) -> Vec<(Contract, Order)> {
        self.placed.lock().clone()
    }

    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.streams.lock().values().filter(|h| !h.is_finished()).count()
    }

    /// Market-data request ids not yet cancelled.
    #[must_use]
    pub fn open_market_requests(&self) -> Vec<RequestId> {
        self.market_requests.lock().clone()
    }

    /// Ids of orders placed and not yet in a terminal state.
    #[must_use]
    pub fn working_orders(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self.working.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    fn abort_streams(&self) {
        for (_, handle) in self.streams.lock().drain() {
            handle.abort();
        }
    }

    fn option_quote(&self, req_id: RequestId, contract: &Contract) {
        let script = self.shared.script.lock();
        let sink = &self.shared.sink;
        if script.option_price > Decimal::ZERO {
            for field in [PriceField::Ask, PriceField::Last, PriceField::Close] {
                sink.tick(
                    req_id,
                    Tick::Price {
                        field,
                        price: script.option_price,
                    },
                );
            }
        }
        let data = script
            .option_data
            .iter()
            .find(|d| Some(d.strike) == contract.strike && Some(d.right) == contract.right);
        if let Some(data) = data {
            sink.tick(
                req_id,
                Tick::Greeks(OptionGreeks {
                    gamma: data.gamma,
                    ..OptionGreeks::default()
                }),
            );
            sink.tick(req_id, Tick::OpenInterest(data.open_interest));
        }
    }

    fn release_group(&self, parent_id: RequestId) {
        let (fill_entries, report_price, option_price) = {
            let script = self.shared.script.lock();
            (script.fill_entries, script.report_fill_price, script.option_price)
        };
        let group: Vec<(Contract, Order)> = self
            .working
            .lock()
            .values()
            .filter(|(_, o)| o.order_id == parent_id || o.parent_id == Some(parent_id))
            .cloned()
            .collect();

        for (_, order) in &group {
            self.report_status(order.order_id, OrderState::Submitted, Decimal::ZERO);
        }
        if !fill_entries {
            return;
        }
        let Some((contract, parent)) = group.into_iter().find(|(_, o)| o.order_id == parent_id) else {
            return;
        };
        let fill_price = match parent.kind {
            OrderKind::Limit { price } => price,
            _ => option_price,
        };
        let multiplier = Decimal::from(contract.multiplier.unwrap_or(1));
        self.positions.lock().push(PositionEntry {
            account: "PAPER".to_string(),
            contract,
            size: Decimal::from(parent.quantity),
            avg_cost: fill_price * multiplier,
        });
        let reported = if report_price { fill_price } else { Decimal::ZERO };
        info!(order_id = parent_id, price = %fill_price, "Paper fill simulated");
        self.report_status(parent_id, OrderState::Filled, reported);
    }
}

#[async_trait]
impl BrokerTransport for PaperBroker {
    async fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<()> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let (failures, next_valid_id) = {
            let script = self.shared.script.lock();
            (script.connect_failures, script.next_valid_id)
        };
        if attempt <= failures {
            warn!(attempt, host, port, "Paper broker refusing connection");
            return Err(BrokerError::Connection(format!(
                "paper broker refused attempt {attempt}"
            )));
        }
        self.shared.connected.store(true, Ordering::SeqCst);
        debug!(host, port, client_id, "Paper broker connected");
        self.shared.sink.next_valid_id(next_valid_id);
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.abort_streams();
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn req_historical_data(
        &self,
        req_id: RequestId,
        _contract: &Contract,
        _end_time: &str,
        _duration: &str,
        _bar_size: &str,
    ) -> Result<()> {
        self.ensure_connected()?;
        let bars = self.shared.script.lock().historical_bars.clone();
        for bar in bars {
            self.shared.sink.historical_bar(req_id, bar);
        }
        self.shared.sink.historical_end(req_id);
        Ok(())
    }

    fn req_real_time_bars(&self, req_id: RequestId, _contract: &Contract, _bar_seconds: u32) -> Result<()> {
        self.ensure_connected()?;
        let task = tokio::spawn(Arc::clone(&self.shared).stream_bars(req_id));
        self.streams.lock().insert(req_id, task);
        Ok(())
    }

    fn cancel_real_time_bars(&self, req_id: RequestId) {
        if let Some(handle) = self.streams.lock().remove(&req_id) {
            handle.abort();
        }
    }

    fn req_market_data(
        &self,
        req_id: RequestId,
        contract: &Contract,
        _generic_ticks: &str,
        _snapshot: bool,
    ) -> Result<()> {
        self.ensure_connected()?;
        self.market_requests.lock().push(req_id);
        if contract.sec_type == SecurityType::Option {
            self.option_quote(req_id, contract);
        } else {
            let price = self.shared.script.lock().underlying_price;
            if price > Decimal::ZERO {
                for field in [PriceField::Last, PriceField::Close] {
                    self.shared.sink.tick(req_id, Tick::Price { field, price });
                }
            }
        }
        Ok(())
    }

    fn cancel_market_data(&self, req_id: RequestId) {
        self.market_requests.lock().retain(|id| *id != req_id);
    }

    fn req_contract_details(&self, req_id: RequestId, contract: &Contract) -> Result<()> {
        self.ensure_connected()?;
        let (reject, min_tick) = {
            let script = self.shared.script.lock();
            (script.reject_options, script.min_tick)
        };
        if reject && contract.sec_type == SecurityType::Option {
            self.shared
                .sink
                .error(req_id, 200, "No security definition has been found for the request");
            return Ok(());
        }
        let mut resolved = contract.clone();
        resolved.con_id = Some(self.next_con_id.fetch_add(1, Ordering::SeqCst));
        self.shared.sink.contract_details(
            req_id,
            ContractDetails {
                contract: resolved,
                min_tick,
            },
        );
        self.shared.sink.contract_details_end(req_id);
        Ok(())
    }

    fn req_sec_def_opt_params(
        &self,
        req_id: RequestId,
        symbol: &str,
        _sec_type: SecurityType,
        underlying_con_id: i64,
    ) -> Result<()> {
        self.ensure_connected()?;
        let script = self.shared.script.lock();
        if !script.chain_strikes.is_empty() {
            self.shared.sink.option_params(
                req_id,
                OptionChainParams {
                    exchange: "SMART".to_string(),
                    underlying_con_id,
                    trading_class: symbol.to_uppercase(),
                    multiplier: 100,
                    expirations: script.chain_expirations.clone(),
                    strikes: script.chain_strikes.clone(),
                },
            );
        }
        self.shared.sink.option_params_end(req_id);
        Ok(())
    }

    fn place_order(&self, contract: &Contract, order: &Order) -> Result<()> {
        self.ensure_connected()?;
        if order.parent_id.is_some() && self.shared.script.lock().reject_child_orders {
            return Err(BrokerError::Api {
                req_id: order.order_id,
                code: 201,
                message: "Order rejected by paper script".to_string(),
            });
        }
        self.placed.lock().push((contract.clone(), order.clone()));
        let modified = self
            .working
            .lock()
            .insert(order.order_id, (contract.clone(), order.clone()))
            .is_some();

        if modified {
            debug!(order_id = order.order_id, "Paper order modified");
            self.report_status(order.order_id, OrderState::Submitted, Decimal::ZERO);
        } else if order.transmit {
            self.release_group(order.parent_id.unwrap_or(order.order_id));
        }
        Ok(())
    }

    fn cancel_order(&self, order_id: RequestId) {
        if self.working.lock().contains_key(&order_id) {
            self.report_status(order_id, OrderState::Cancelled, Decimal::ZERO);
        }
    }

    fn req_positions(&self) -> Result<()> {
        self.ensure_connected()?;
        for entry in self.positions.lock().iter() {
            self.shared.sink.position(entry.clone());
        }
        self.shared.sink.position_end();
        Ok(())
    }
}
