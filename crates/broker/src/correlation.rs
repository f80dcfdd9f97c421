//! Request/response correlation over the transport's event queues.
//!
//! Every outbound request reserves an id from the shared allocator; inbound
//! events are matched back to the waiting call by that id alone. Three wait
//! shapes cover every call:
//!
//! - single-shot: first event carrying the id, bounded by a timeout;
//! - streaming: events for the id until its end sentinel, each pop bounded;
//! - snapshot: ticks for a set of ids until each has a required field set or
//!   a deadline passes, returning whatever arrived.
//!
//! Events for other ids are discarded and logged. A broker error notice
//! carrying the pending id fails the call immediately.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use orb_core::{Bar, ConnectionConfig, EngineConfig};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::{BrokerError, Result};
use crate::events::{EventQueues, CONNECTION_CLOSED_CODE};
use crate::request_id::RequestIdAllocator;
use crate::transport::BrokerTransport;
use crate::types::{
    BrokerNotice, Contract, ContractDetails, ContractDetailsEvent, Correlated, HistoricalBarEvent,
    MarketDataEvent, MarketSnapshot, OptionChainParams, OptionParamsEvent, Order,
    OrderStatusEvent, PositionEntry, RealTimeBarEvent, RequestId, SecurityType, SnapshotField,
    StreamItem,
};

/// Multi-part responses terminated by an end sentinel.
trait Streamed: Correlated {
    type Item;
    fn into_item(self) -> StreamItem<Self::Item>;
}

impl Streamed for HistoricalBarEvent {
    type Item = Bar;
    fn into_item(self) -> StreamItem<Bar> {
        self.item
    }
}

impl Streamed for ContractDetailsEvent {
    type Item = ContractDetails;
    fn into_item(self) -> StreamItem<ContractDetails> {
        self.item
    }
}

impl Streamed for OptionParamsEvent {
    type Item = OptionChainParams;
    fn into_item(self) -> StreamItem<OptionChainParams> {
        self.item
    }
}

/// Fails the pending call if `notice` concerns it or the session.
fn check_notice(notice: BrokerNotice, req_id: RequestId) -> Result<()> {
    match notice.req_id {
        Some(id) if id == req_id => Err(BrokerError::Api {
            req_id,
            code: notice.code,
            message: notice.message,
        }),
        None if notice.code == CONNECTION_CLOSED_CODE => Err(BrokerError::ConnectionLost),
        _ => {
            debug!(
                pending = req_id,
                notice_req_id = ?notice.req_id,
                code = notice.code,
                "Notice not for the pending request"
            );
            Ok(())
        }
    }
}

async fn next_correlated<T: Correlated>(
    events: &mut UnboundedReceiver<T>,
    notices: &mut UnboundedReceiver<BrokerNotice>,
    req_id: RequestId,
    deadline: Instant,
    operation: &'static str,
) -> Result<T> {
    let mut discarded = 0usize;
    loop {
        if Instant::now() >= deadline {
            return Err(expired(req_id, discarded, operation));
        }
        tokio::select! {
            biased;
            notice = notices.recv() => {
                check_notice(notice.ok_or(BrokerError::ChannelClosed)?, req_id)?;
            }
            event = events.recv() => {
                let event = event.ok_or(BrokerError::ChannelClosed)?;
                if event.req_id() == req_id {
                    return Ok(event);
                }
                discarded += 1;
                warn!(
                    expected = req_id,
                    received = event.req_id(),
                    operation,
                    "Discarding uncorrelated event"
                );
            }
            () = sleep_until(deadline) => {
                return Err(expired(req_id, discarded, operation));
            }
        }
    }
}

fn expired(req_id: RequestId, discarded: usize, operation: &'static str) -> BrokerError {
    if discarded > 0 {
        BrokerError::CorrelationMismatch {
            expected: req_id,
            discarded,
        }
    } else {
        BrokerError::timeout(operation, req_id)
    }
}

async fn collect_stream<E: Streamed>(
    events: &mut UnboundedReceiver<E>,
    notices: &mut UnboundedReceiver<BrokerNotice>,
    req_id: RequestId,
    per_item_timeout: Duration,
    operation: &'static str,
) -> Result<Vec<E::Item>> {
    let mut items = Vec::new();
    loop {
        let deadline = Instant::now() + per_item_timeout;
        let event = next_correlated(events, notices, req_id, deadline, operation)
            .await
            .inspect_err(|e| {
                warn!(req_id, operation, received = items.len(), error = %e, "Stream incomplete");
            })?;
        match event.into_item() {
            StreamItem::Item(item) => items.push(item),
            StreamItem::End => return Ok(items),
        }
    }
}

/// Connection parameters and default deadlines for a [`BrokerClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientSettings {
    pub fn from_config(connection: &ConnectionConfig, engine: &EngineConfig) -> Self {
        Self {
            host: connection.host.clone(),
            port: connection.port,
            client_id: connection.client_id,
            connect_timeout: Duration::from_secs(connection.connect_timeout_secs),
            request_timeout: Duration::from_secs(engine.request_timeout_secs),
        }
    }
}

/// Blocking, timeout-bounded broker calls built on a [`BrokerTransport`].
///
/// Calls are meant to be issued from one logical flow at a time; each call
/// locks the queues it reads for its whole duration.
pub struct BrokerClient {
    transport: Arc<dyn BrokerTransport>,
    ids: RequestIdAllocator,
    settings: ClientSettings,
    next_valid_id: Mutex<UnboundedReceiver<RequestId>>,
    historical: Mutex<UnboundedReceiver<HistoricalBarEvent>>,
    realtime: Mutex<UnboundedReceiver<RealTimeBarEvent>>,
    market: Mutex<UnboundedReceiver<MarketDataEvent>>,
    contract_details: Mutex<UnboundedReceiver<ContractDetailsEvent>>,
    option_params: Mutex<UnboundedReceiver<OptionParamsEvent>>,
    order_status: Mutex<UnboundedReceiver<OrderStatusEvent>>,
    positions: Mutex<UnboundedReceiver<StreamItem<PositionEntry>>>,
    notices: Mutex<UnboundedReceiver<BrokerNotice>>,
}

impl BrokerClient {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        queues: EventQueues,
        settings: ClientSettings,
    ) -> Self {
        Self {
            transport,
            ids: RequestIdAllocator::default(),
            settings,
            next_valid_id: Mutex::new(queues.next_valid_id),
            historical: Mutex::new(queues.historical),
            realtime: Mutex::new(queues.realtime),
            market: Mutex::new(queues.market),
            contract_details: Mutex::new(queues.contract_details),
            option_params: Mutex::new(queues.option_params),
            order_status: Mutex::new(queues.order_status),
            positions: Mutex::new(queues.positions),
            notices: Mutex::new(queues.notices),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Connects and waits for the broker's next valid id, which seeds the
    /// id allocator.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connection`] if the transport cannot connect and
    /// [`BrokerError::Timeout`] if the handshake does not complete in time.
    pub async fn connect(&self) -> Result<()> {
        if self.transport.is_connected() {
            warn!("Already connected");
            return Ok(());
        }
        let s = &self.settings;
        info!(host = %s.host, port = s.port, client_id = s.client_id, "Connecting to broker");

        // Notices left over from a previous session would fail the first call.
        self.discard_stale_notices().await;

        self.transport
            .connect(&s.host, s.port, s.client_id)
            .await?;

        let mut handshake = self.next_valid_id.lock().await;
        match tokio::time::timeout(s.connect_timeout, handshake.recv()).await {
            Ok(Some(next_id)) => {
                self.ids.seed(next_id);
                info!(next_id, "Connection established");
                Ok(())
            }
            Ok(None) => {
                self.transport.disconnect();
                Err(BrokerError::ChannelClosed)
            }
            Err(_) => {
                warn!(
                    timeout_secs = s.connect_timeout.as_secs(),
                    "No next valid id received, abandoning connection"
                );
                self.transport.disconnect();
                Err(BrokerError::timeout("next valid id", -1))
            }
        }
    }

    async fn discard_stale_notices(&self) {
        let mut notices = self.notices.lock().await;
        while let Ok(notice) = notices.try_recv() {
            debug!(code = notice.code, req_id = ?notice.req_id, "Discarding stale notice");
        }
    }

    pub fn disconnect(&self) {
        info!("Disconnecting from broker");
        self.transport.disconnect();
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Reserves `count` contiguous ids and returns the first.
    pub fn next_request_id(&self, count: u32) -> RequestId {
        self.ids.reserve(count)
    }

    /// Requests historical bars and drains them until the end sentinel.
    ///
    /// # Errors
    ///
    /// Fails if any single pop waits longer than `timeout`, or the broker
    /// rejects the request.
    pub async fn historical_bars(
        &self,
        contract: &Contract,
        end_time: &str,
        duration: &str,
        bar_size: &str,
        timeout: Duration,
    ) -> Result<Vec<Bar>> {
        let req_id = self.ids.next_id();
        info!(req_id, symbol = %contract.symbol, end_time, duration, bar_size, "Requesting historical bars");

        let mut events = self.historical.lock().await;
        let mut notices = self.notices.lock().await;
        self.transport
            .req_historical_data(req_id, contract, end_time, duration, bar_size)?;
        let bars = collect_stream(&mut events, &mut notices, req_id, timeout, "historical data").await?;
        debug!(req_id, count = bars.len(), "Historical bars received");
        Ok(bars)
    }

    /// Starts a real-time bar subscription and returns its request id.
    ///
    /// # Errors
    ///
    /// Fails if the transport refuses the request.
    pub fn subscribe_real_time_bars(&self, contract: &Contract, bar_seconds: u32) -> Result<RequestId> {
        let req_id = self.ids.next_id();
        self.transport.req_real_time_bars(req_id, contract, bar_seconds)?;
        info!(req_id, symbol = %contract.symbol, bar_seconds, "Subscribed to real-time bars");
        Ok(req_id)
    }

    /// Waits for the next bar of subscription `req_id`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Timeout`] when no bar arrives within `timeout`.
    pub async fn next_real_time_bar(&self, req_id: RequestId, timeout: Duration) -> Result<Bar> {
        let mut events = self.realtime.lock().await;
        let mut notices = self.notices.lock().await;
        let deadline = Instant::now() + timeout;
        next_correlated(&mut events, &mut notices, req_id, deadline, "real-time bar")
            .await
            .map(|event| event.bar)
    }

    pub fn cancel_real_time_bars(&self, req_id: RequestId) {
        info!(req_id, "Cancelling real-time bars");
        self.transport.cancel_real_time_bars(req_id);
    }

    /// Resolves `contract` to the broker's canonical definition. `None` when
    /// the broker knows no such contract.
    ///
    /// # Errors
    ///
    /// Fails on timeout or transport errors. A broker "no definition"
    /// error is reported as `Ok(None)`.
    pub async fn contract_details(&self, contract: &Contract) -> Result<Option<ContractDetails>> {
        let req_id = self.ids.next_id();
        debug!(req_id, contract = %contract.display_name(), "Resolving contract");

        let mut events = self.contract_details.lock().await;
        let mut notices = self.notices.lock().await;
        self.transport.req_contract_details(req_id, contract)?;
        let result = collect_stream(
            &mut events,
            &mut notices,
            req_id,
            self.settings.request_timeout,
            "contract details",
        )
        .await;

        match result {
            Ok(details) => {
                if details.len() > 1 {
                    warn!(req_id, matches = details.len(), "Ambiguous contract, using first match");
                }
                Ok(details.into_iter().next())
            }
            Err(BrokerError::Api { code, message, .. }) => {
                warn!(req_id, code, message, contract = %contract.display_name(), "Contract not resolved");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches option-chain parameters (expirations and strikes) for an underlying.
    ///
    /// # Errors
    ///
    /// Fails on timeout, broker rejection or transport errors.
    pub async fn option_chain_params(
        &self,
        symbol: &str,
        sec_type: SecurityType,
        underlying_con_id: i64,
    ) -> Result<Vec<OptionChainParams>> {
        let req_id = self.ids.next_id();
        debug!(req_id, symbol, con_id = underlying_con_id, "Requesting option chain parameters");

        let mut events = self.option_params.lock().await;
        let mut notices = self.notices.lock().await;
        self.transport
            .req_sec_def_opt_params(req_id, symbol, sec_type, underlying_con_id)?;
        collect_stream(
            &mut events,
            &mut notices,
            req_id,
            self.settings.request_timeout,
            "option chain parameters",
        )
        .await
    }

    /// Issues a market-data request and returns its id. Pair with
    /// [`Self::collect_snapshots`] and [`Self::cancel_market_data`].
    ///
    /// # Errors
    ///
    /// Fails if the transport refuses the request.
    pub fn request_market_data(
        &self,
        contract: &Contract,
        generic_ticks: &str,
        snapshot: bool,
    ) -> Result<RequestId> {
        let req_id = self.ids.next_id();
        trace!(req_id, contract = %contract.display_name(), generic_ticks, "Requesting market data");
        self.transport
            .req_market_data(req_id, contract, generic_ticks, snapshot)?;
        Ok(req_id)
    }

    pub fn cancel_market_data(&self, req_id: RequestId) {
        trace!(req_id, "Cancelling market data");
        self.transport.cancel_market_data(req_id);
    }

    /// Accumulates ticks for `req_ids` until every request has all of
    /// `required`, or `timeout` elapses. Partial snapshots are returned as-is;
    /// a request the broker rejects keeps whatever it had.
    ///
    /// # Errors
    ///
    /// Only connectivity failures are errors.
    pub async fn collect_snapshots(
        &self,
        req_ids: &[RequestId],
        required: &[SnapshotField],
        timeout: Duration,
    ) -> Result<HashMap<RequestId, MarketSnapshot>> {
        let deadline = Instant::now() + timeout;
        let mut snapshots: HashMap<RequestId, MarketSnapshot> =
            req_ids.iter().map(|id| (*id, MarketSnapshot::default())).collect();
        let mut pending: HashSet<RequestId> = req_ids.iter().copied().collect();

        let mut market = self.market.lock().await;
        let mut notices = self.notices.lock().await;

        while !pending.is_empty() {
            tokio::select! {
                biased;
                notice = notices.recv() => {
                    let notice = notice.ok_or(BrokerError::ChannelClosed)?;
                    match notice.req_id {
                        Some(id) if pending.remove(&id) => {
                            warn!(req_id = id, code = notice.code, message = %notice.message, "Market data request failed");
                        }
                        None if notice.code == CONNECTION_CLOSED_CODE => {
                            return Err(BrokerError::ConnectionLost);
                        }
                        _ => debug!(code = notice.code, req_id = ?notice.req_id, "Notice not for pending snapshots"),
                    }
                }
                event = market.recv() => {
                    let event = event.ok_or(BrokerError::ChannelClosed)?;
                    match snapshots.get_mut(&event.req_id) {
                        Some(snapshot) => {
                            snapshot.apply(event.tick);
                            if snapshot.has_all(required) {
                                pending.remove(&event.req_id);
                            }
                        }
                        None => trace!(req_id = event.req_id, "Ignoring tick for inactive request"),
                    }
                }
                () = sleep_until(deadline) => {
                    debug!(
                        incomplete = pending.len(),
                        total = req_ids.len(),
                        "Snapshot deadline reached"
                    );
                    break;
                }
            }
        }
        Ok(snapshots)
    }

    /// One-contract snapshot: request, collect, cancel.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be issued or the connection drops.
    pub async fn market_snapshot(
        &self,
        contract: &Contract,
        generic_ticks: &str,
        required: &[SnapshotField],
        timeout: Duration,
    ) -> Result<MarketSnapshot> {
        let req_id = self.request_market_data(contract, generic_ticks, true)?;
        let result = self.collect_snapshots(&[req_id], required, timeout).await;
        self.cancel_market_data(req_id);
        let mut snapshots = result?;
        Ok(snapshots.remove(&req_id).unwrap_or_default())
    }

    /// Places or modifies an order and returns its id.
    ///
    /// # Errors
    ///
    /// Fails if the transport refuses the order.
    pub fn place_order(&self, contract: &Contract, order: &Order) -> Result<RequestId> {
        self.transport.place_order(contract, order)?;
        info!(
            order_id = order.order_id,
            parent_id = ?order.parent_id,
            action = %order.action,
            kind = ?order.kind,
            quantity = order.quantity,
            transmit = order.transmit,
            contract = %contract.display_name(),
            "Order placed"
        );
        Ok(order.order_id)
    }

    pub fn cancel_order(&self, order_id: RequestId) {
        info!(order_id, "Cancelling order");
        self.transport.cancel_order(order_id);
    }

    /// Takes every order-status event queued so far, without waiting.
    pub async fn drain_order_statuses(&self) -> Vec<OrderStatusEvent> {
        let mut queue = self.order_status.lock().await;
        let mut drained = Vec::new();
        while let Ok(event) = queue.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Requests the account's open positions and waits for the end sentinel.
    ///
    /// # Errors
    ///
    /// Fails if the request is refused or the list does not complete in time.
    pub async fn positions(&self) -> Result<Vec<PositionEntry>> {
        let mut queue = self.positions.lock().await;
        self.transport.req_positions()?;
        let mut entries = Vec::new();
        loop {
            match tokio::time::timeout(self.settings.request_timeout, queue.recv()).await {
                Ok(Some(StreamItem::Item(entry))) => entries.push(entry),
                Ok(Some(StreamItem::End)) => return Ok(entries),
                Ok(None) => return Err(BrokerError::ChannelClosed),
                Err(_) => return Err(BrokerError::timeout("positions", -1)),
            }
        }
    }
}
