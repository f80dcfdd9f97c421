use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Contract, Order, RequestId, SecurityType};

/// Request side of a broker connection.
///
/// Implementations send requests without waiting for answers. Responses
/// arrive asynchronously through the [`crate::EventSink`] the transport was
/// built with, tagged with the request id passed here.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Opens the session. Completion is signalled by a next-valid-id event.
    async fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<()>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// `end_time` uses the broker's `yyyymmdd hh:mm:ss <tz>` notation and
    /// `duration` its `"<n> S"` notation.
    fn req_historical_data(
        &self,
        req_id: RequestId,
        contract: &Contract,
        end_time: &str,
        duration: &str,
        bar_size: &str,
    ) -> Result<()>;

    fn req_real_time_bars(&self, req_id: RequestId, contract: &Contract, bar_seconds: u32)
        -> Result<()>;

    fn cancel_real_time_bars(&self, req_id: RequestId);

    /// `generic_ticks` is a comma-separated list of extra tick groups, e.g. `"101,104"`.
    fn req_market_data(
        &self,
        req_id: RequestId,
        contract: &Contract,
        generic_ticks: &str,
        snapshot: bool,
    ) -> Result<()>;

    fn cancel_market_data(&self, req_id: RequestId);

    fn req_contract_details(&self, req_id: RequestId, contract: &Contract) -> Result<()>;

    fn req_sec_def_opt_params(
        &self,
        req_id: RequestId,
        symbol: &str,
        sec_type: SecurityType,
        underlying_con_id: i64,
    ) -> Result<()>;

    /// Places a new order, or modifies the working order with the same id.
    fn place_order(&self, contract: &Contract, order: &Order) -> Result<()>;

    fn cancel_order(&self, order_id: RequestId);

    fn req_positions(&self) -> Result<()>;
}
