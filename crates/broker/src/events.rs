//! Per-category event queues between a transport's background worker and
//! the foreground [`crate::BrokerClient`].

use orb_core::Bar;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, trace, warn};

use crate::types::{
    BrokerNotice, ContractDetails, ContractDetailsEvent, HistoricalBarEvent, MarketDataEvent,
    OptionChainParams, OptionParamsEvent, OrderStatusEvent, PositionEntry, RealTimeBarEvent,
    RequestId, StreamItem, Tick,
};

/// Notice code used when the transport loses its connection.
pub const CONNECTION_CLOSED_CODE: i32 = -1;

/// Broker "error" codes that are purely informational (data-farm status and similar).
#[must_use]
pub fn is_informational(code: i32) -> bool {
    (2100..=2110).contains(&code) || code == 2158
}

/// Producer half, owned by the transport.
#[derive(Debug, Clone)]
pub struct EventSink {
    next_valid_id: UnboundedSender<RequestId>,
    historical: UnboundedSender<HistoricalBarEvent>,
    realtime: UnboundedSender<RealTimeBarEvent>,
    market: UnboundedSender<MarketDataEvent>,
    contract_details: UnboundedSender<ContractDetailsEvent>,
    option_params: UnboundedSender<OptionParamsEvent>,
    order_status: UnboundedSender<OrderStatusEvent>,
    positions: UnboundedSender<StreamItem<PositionEntry>>,
    notices: UnboundedSender<BrokerNotice>,
}

/// Consumer half, owned by the client.
#[derive(Debug)]
pub struct EventQueues {
    pub(crate) next_valid_id: UnboundedReceiver<RequestId>,
    pub(crate) historical: UnboundedReceiver<HistoricalBarEvent>,
    pub(crate) realtime: UnboundedReceiver<RealTimeBarEvent>,
    pub(crate) market: UnboundedReceiver<MarketDataEvent>,
    pub(crate) contract_details: UnboundedReceiver<ContractDetailsEvent>,
    pub(crate) option_params: UnboundedReceiver<OptionParamsEvent>,
    pub(crate) order_status: UnboundedReceiver<OrderStatusEvent>,
    pub(crate) positions: UnboundedReceiver<StreamItem<PositionEntry>>,
    pub(crate) notices: UnboundedReceiver<BrokerNotice>,
}

/// Creates a connected sink/queues pair.
#[must_use]
pub fn event_channel() -> (EventSink, EventQueues) {
    let (next_valid_id_tx, next_valid_id_rx) = unbounded_channel();
    let (historical_tx, historical_rx) = unbounded_channel();
    let (realtime_tx, realtime_rx) = unbounded_channel();
    let (market_tx, market_rx) = unbounded_channel();
    let (details_tx, details_rx) = unbounded_channel();
    let (params_tx, params_rx) = unbounded_channel();
    let (status_tx, status_rx) = unbounded_channel();
    let (positions_tx, positions_rx) = unbounded_channel();
    let (notices_tx, notices_rx) = unbounded_channel();

    let sink = EventSink {
        next_valid_id: next_valid_id_tx,
        historical: historical_tx,
        realtime: realtime_tx,
        market: market_tx,
        contract_details: details_tx,
        option_params: params_tx,
        order_status: status_tx,
        positions: positions_tx,
        notices: notices_tx,
    };
    let queues = EventQueues {
        next_valid_id: next_valid_id_rx,
        historical: historical_rx,
        realtime: realtime_rx,
        market: market_rx,
        contract_details: details_rx,
        option_params: params_rx,
        order_status: status_rx,
        positions: positions_rx,
        notices: notices_rx,
    };
    (sink, queues)
}

fn push<T>(tx: &UnboundedSender<T>, queue: &'static str, event: T) {
    if tx.send(event).is_err() {
        trace!(queue, "Event dropped, client gone");
    }
}

impl EventSink {
    /// Handshake marker: the broker's first usable order id.
    pub fn next_valid_id(&self, order_id: RequestId) {
        info!(order_id, "Received next valid order id");
        push(&self.next_valid_id, "next_valid_id", order_id);
    }

    pub fn historical_bar(&self, req_id: RequestId, bar: Bar) {
        push(
            &self.historical,
            "historical",
            HistoricalBarEvent {
                req_id,
                item: StreamItem::Item(bar),
            },
        );
    }

    pub fn historical_end(&self, req_id: RequestId) {
        push(
            &self.historical,
            "historical",
            HistoricalBarEvent {
                req_id,
                item: StreamItem::End,
            },
        );
    }

    pub fn realtime_bar(&self, req_id: RequestId, bar: Bar) {
        push(&self.realtime, "realtime", RealTimeBarEvent { req_id, bar });
    }

    pub fn tick(&self, req_id: RequestId, tick: Tick) {
        push(&self.market, "market", MarketDataEvent { req_id, tick });
    }

    pub fn contract_details(&self, req_id: RequestId, details: ContractDetails) {
        push(
            &self.contract_details,
            "contract_details",
            ContractDetailsEvent {
                req_id,
                item: StreamItem::Item(details),
            },
        );
    }

    pub fn contract_details_end(&self, req_id: RequestId) {
        push(
            &self.contract_details,
            "contract_details",
            ContractDetailsEvent {
                req_id,
                item: StreamItem::End,
            },
        );
    }

    pub fn option_params(&self, req_id: RequestId, params: OptionChainParams) {
        push(
            &self.option_params,
            "option_params",
            OptionParamsEvent {
                req_id,
                item: StreamItem::Item(params),
            },
        );
    }

    pub fn option_params_end(&self, req_id: RequestId) {
        push(
            &self.option_params,
            "option_params",
            OptionParamsEvent {
                req_id,
                item: StreamItem::End,
            },
        );
    }

    pub fn order_status(&self, event: OrderStatusEvent) {
        push(&self.order_status, "order_status", event);
    }

    pub fn position(&self, entry: PositionEntry) {
        push(&self.positions, "positions", StreamItem::Item(entry));
    }

    pub fn position_end(&self) {
        push(&self.positions, "positions", StreamItem::End);
    }

    /// Routes a broker error callback. Informational codes are only logged.
    /// `req_id` is negative for session-level messages.
    pub fn error(&self, req_id: RequestId, code: i32, message: &str) {
        if is_informational(code) {
            info!(req_id, code, message, "Broker notice");
            return;
        }
        error!(req_id, code, message, "Broker error");
        let notice = BrokerNotice {
            req_id: (req_id >= 0).then_some(req_id),
            code,
            message: message.to_string(),
        };
        push(&self.notices, "notices", notice);
    }

    pub fn connection_closed(&self) {
        warn!("Connection to broker lost");
        push(
            &self.notices,
            "notices",
            BrokerNotice {
                req_id: None,
                code: CONNECTION_CLOSED_CODE,
                message: "Connection lost".to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn informational_codes() {
        assert!(is_informational(2104));
        assert!(is_informational(2100));
        assert!(is_informational(2110));
        assert!(is_informational(2158));
        assert!(!is_informational(2111));
        assert!(!is_informational(200));
    }

    #[test]
    fn informational_notices_are_not_queued() {
        let (sink, mut queues) = event_channel();
        sink.error(-1, 2104, "Market data farm connection is OK");
        sink.error(7, 200, "No security definition has been found");
        sink.error(-1, 504, "Not connected");

        let first = queues.notices.try_recv().unwrap();
        assert_eq!(first.req_id, Some(7));
        assert_eq!(first.code, 200);
        let second = queues.notices.try_recv().unwrap();
        assert_eq!(second.req_id, None);
        assert!(queues.notices.try_recv().is_err());
    }

    #[test]
    fn sink_outlives_client() {
        let (sink, queues) = event_channel();
        drop(queues);
        sink.connection_closed();
        sink.historical_end(1);
    }
}
