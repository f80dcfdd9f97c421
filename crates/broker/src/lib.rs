//! Broker boundary for the opening-range breakout trader.
//!
//! A [`BrokerTransport`] sends requests and pushes asynchronous responses
//! onto per-category queues through an [`EventSink`]. [`BrokerClient`]
//! turns those queues back into timeout-bounded calls correlated by request
//! id. [`paper::PaperBroker`] is a scripted in-process transport.

pub mod correlation;
pub mod error;
pub mod events;
pub mod paper;
pub mod request_id;
pub mod transport;
pub mod types;

pub use correlation::{BrokerClient, ClientSettings};
pub use error::BrokerError;
pub use events::{event_channel, is_informational, EventQueues, EventSink};
pub use request_id::RequestIdAllocator;
pub use transport::BrokerTransport;
pub use types::{
    Contract, ContractDetails, MarketSnapshot, OptionChainParams, OptionGreeks, OptionRight,
    Order, OrderAction, OrderKind, OrderState, OrderStatusEvent, PositionEntry, PriceField,
    RequestId, SecurityType, SnapshotField, Tick, TimeInForce,
};
