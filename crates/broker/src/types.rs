//! Contract, order and event types exchanged with the broker transport.

use chrono::NaiveDate;
use orb_core::Bar;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request and order identifiers share one id space.
pub type RequestId = i64;

/// Underlyings quoted as indices rather than stocks.
const INDEX_SYMBOLS: [&str; 4] = ["SPX", "VIX", "NDX", "RUT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityType {
    #[serde(rename = "STK")]
    Stock,
    #[serde(rename = "IND")]
    Index,
    #[serde(rename = "OPT")]
    Option,
}

impl SecurityType {
    /// Security type of an underlying symbol.
    #[must_use]
    pub fn for_underlying(symbol: &str) -> Self {
        if INDEX_SYMBOLS.contains(&symbol.to_uppercase().as_str()) {
            Self::Index
        } else {
            Self::Stock
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stock => "STK",
            Self::Index => "IND",
            Self::Option => "OPT",
        }
    }
}

impl std::fmt::Display for SecurityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options contract right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionRight {
    #[serde(rename = "C")]
    Call,
    #[serde(rename = "P")]
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

/// A broker contract. Option fields are `None` for underlyings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub sec_type: SecurityType,
    pub exchange: String,
    pub currency: String,
    pub expiration: Option<NaiveDate>,
    pub strike: Option<Decimal>,
    pub right: Option<OptionRight>,
    pub multiplier: Option<u32>,
    /// Broker-assigned identifier, known only after resolution.
    pub con_id: Option<i64>,
}

impl Contract {
    /// The underlying contract for `symbol`, typed STK or IND.
    pub fn underlying(symbol: &str, exchange: &str, currency: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            sec_type: SecurityType::for_underlying(symbol),
            exchange: exchange.to_string(),
            currency: currency.to_string(),
            expiration: None,
            strike: None,
            right: None,
            multiplier: None,
            con_id: None,
        }
    }

    pub fn option(
        symbol: &str,
        exchange: &str,
        currency: &str,
        expiration: NaiveDate,
        strike: Decimal,
        right: OptionRight,
        multiplier: u32,
    ) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            sec_type: SecurityType::Option,
            exchange: exchange.to_string(),
            currency: currency.to_string(),
            expiration: Some(expiration),
            strike: Some(strike),
            right: Some(right),
            multiplier: Some(multiplier),
            con_id: None,
        }
    }

    /// Human-readable contract description (e.g., "SPX 5000C 2026-03-20").
    pub fn display_name(&self) -> String {
        match (self.strike, self.right, self.expiration) {
            (Some(strike), Some(right), Some(expiry)) => {
                format!("{} {}{} {}", self.symbol, strike, right, expiry)
            }
            _ => format!("{} {}", self.symbol, self.sec_type),
        }
    }

    /// Identity check that ignores fields the broker fills in on resolution.
    #[must_use]
    pub fn same_instrument(&self, other: &Self) -> bool {
        match (self.con_id, other.con_id) {
            (Some(a), Some(b)) => a == b,
            _ => {
                self.symbol == other.symbol
                    && self.sec_type == other.sec_type
                    && self.expiration == other.expiration
                    && self.strike == other.strike
                    && self.right == other.right
            }
        }
    }
}

/// Result of a contract-details lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDetails {
    /// Canonical contract with `con_id` populated.
    pub contract: Contract,
    /// Minimum price increment. Zero or negative when the broker does not report one.
    pub min_tick: Decimal,
}

/// One exchange's option-chain parameters for an underlying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionChainParams {
    pub exchange: String,
    pub underlying_con_id: i64,
    pub trading_class: String,
    pub multiplier: u32,
    pub expirations: Vec<NaiveDate>,
    pub strikes: Vec<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit { price: Decimal },
    Stop { aux_price: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    Gtc,
}

/// An order as submitted to the broker. Re-submitting an existing
/// `order_id` modifies that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: RequestId,
    pub parent_id: Option<RequestId>,
    pub action: OrderAction,
    pub kind: OrderKind,
    pub quantity: u32,
    pub tif: TimeInForce,
    /// `false` stages the order; the group is released by the first transmitted order.
    pub transmit: bool,
}

impl Order {
    /// Limit or stop price, if any.
    #[must_use]
    pub const fn price(&self) -> Option<Decimal> {
        match self.kind {
            OrderKind::Market => None,
            OrderKind::Limit { price } => Some(price),
            OrderKind::Stop { aux_price } => Some(aux_price),
        }
    }
}

/// Order state as reported by the broker's status feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    PendingSubmit,
    PreSubmitted,
    Submitted,
    PendingCancel,
    Filled,
    Cancelled,
    ApiCancelled,
    Inactive,
    Rejected,
    Other(String),
}

impl OrderState {
    /// Parses the broker's status string. Unknown values are kept verbatim.
    pub fn parse(status: &str) -> Self {
        match status {
            "PendingSubmit" => Self::PendingSubmit,
            "PreSubmitted" => Self::PreSubmitted,
            "Submitted" => Self::Submitted,
            "PendingCancel" => Self::PendingCancel,
            "Filled" => Self::Filled,
            "Cancelled" => Self::Cancelled,
            "ApiCancelled" => Self::ApiCancelled,
            "Inactive" => Self::Inactive,
            "Rejected" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }

    /// No further transitions follow a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::ApiCancelled | Self::Inactive | Self::Rejected
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingSubmit => write!(f, "PendingSubmit"),
            Self::PreSubmitted => write!(f, "PreSubmitted"),
            Self::Submitted => write!(f, "Submitted"),
            Self::PendingCancel => write!(f, "PendingCancel"),
            Self::Filled => write!(f, "Filled"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::ApiCancelled => write!(f, "ApiCancelled"),
            Self::Inactive => write!(f, "Inactive"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub order_id: RequestId,
    pub status: OrderState,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Decimal,
}

/// An open position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub account: String,
    pub contract: Contract,
    pub size: Decimal,
    /// Per-contract average cost (premium times multiplier for options).
    pub avg_cost: Decimal,
}

/// Option greeks snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub implied_vol: f64,
    pub underlying_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceField {
    Bid,
    Ask,
    Last,
    Close,
}

/// A single market-data update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Tick {
    Price { field: PriceField, price: Decimal },
    OpenInterest(Decimal),
    Greeks(OptionGreeks),
}

/// Fields a snapshot collection can wait for before exiting early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotField {
    Bid,
    Ask,
    Last,
    Close,
    OpenInterest,
    Gamma,
}

/// Market data accumulated for one request. Unavailable values stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    pub close: Option<Decimal>,
    pub open_interest: Option<Decimal>,
    pub greeks: Option<OptionGreeks>,
}

impl MarketSnapshot {
    /// Folds one tick in. Non-positive prices mean "unavailable" and are
    /// ignored, so a zero ask never counts as a quoted field.
    pub fn apply(&mut self, tick: Tick) {
        match tick {
            Tick::Price { field, price } => {
                if price <= Decimal::ZERO {
                    return;
                }
                let slot = match field {
                    PriceField::Bid => &mut self.bid,
                    PriceField::Ask => &mut self.ask,
                    PriceField::Last => &mut self.last,
                    PriceField::Close => &mut self.close,
                };
                *slot = Some(price);
            }
            Tick::OpenInterest(oi) => {
                if !oi.is_sign_negative() && self.open_interest.is_none() {
                    self.open_interest = Some(oi);
                }
            }
            Tick::Greeks(greeks) => {
                if self.greeks.is_none() {
                    self.greeks = Some(greeks);
                }
            }
        }
    }

    #[must_use]
    pub fn has(&self, field: SnapshotField) -> bool {
        match field {
            SnapshotField::Bid => self.bid.is_some(),
            SnapshotField::Ask => self.ask.is_some(),
            SnapshotField::Last => self.last.is_some(),
            SnapshotField::Close => self.close.is_some(),
            SnapshotField::OpenInterest => self.open_interest.is_some(),
            SnapshotField::Gamma => self.greeks.is_some(),
        }
    }

    #[must_use]
    pub fn has_all(&self, fields: &[SnapshotField]) -> bool {
        fields.iter().all(|f| self.has(*f))
    }
}

/// An item of a multi-part response. `End` is the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem<T> {
    Item(T),
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalBarEvent {
    pub req_id: RequestId,
    pub item: StreamItem<Bar>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealTimeBarEvent {
    pub req_id: RequestId,
    pub bar: Bar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataEvent {
    pub req_id: RequestId,
    pub tick: Tick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDetailsEvent {
    pub req_id: RequestId,
    pub item: StreamItem<ContractDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionParamsEvent {
    pub req_id: RequestId,
    pub item: StreamItem<OptionChainParams>,
}

/// Error or informational message from the broker. `req_id` is `None` for
/// session-level notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerNotice {
    pub req_id: Option<RequestId>,
    pub code: i32,
    pub message: String,
}

/// Events tagged with the request that produced them.
pub trait Correlated {
    fn req_id(&self) -> RequestId;
}

macro_rules! correlated {
    ($($ty:ty),* $(,)?) => {
        $(impl Correlated for $ty {
            fn req_id(&self) -> RequestId {
                self.req_id
            }
        })*
    };
}

correlated!(
    HistoricalBarEvent,
    RealTimeBarEvent,
    MarketDataEvent,
    ContractDetailsEvent,
    OptionParamsEvent,
);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn index_symbols_are_ind() {
        assert_eq!(SecurityType::for_underlying("SPX"), SecurityType::Index);
        assert_eq!(SecurityType::for_underlying("vix"), SecurityType::Index);
        assert_eq!(SecurityType::for_underlying("AAPL"), SecurityType::Stock);
        assert_eq!(Contract::underlying("spx", "CBOE", "USD").sec_type.as_str(), "IND");
    }

    #[test]
    fn terminal_states() {
        for s in ["Filled", "Cancelled", "ApiCancelled", "Inactive", "Rejected"] {
            assert!(OrderState::parse(s).is_terminal(), "{s}");
        }
        for s in ["Submitted", "PreSubmitted", "PendingCancel", "Weird"] {
            assert!(!OrderState::parse(s).is_terminal(), "{s}");
        }
        assert_eq!(OrderState::parse("Weird").to_string(), "Weird");
    }

    #[test]
    fn snapshot_ignores_unavailable_prices() {
        let mut snap = MarketSnapshot::default();
        snap.apply(Tick::Price {
            field: PriceField::Ask,
            price: dec!(-1),
        });
        assert!(!snap.has(SnapshotField::Ask));
        snap.apply(Tick::Price {
            field: PriceField::Ask,
            price: Decimal::ZERO,
        });
        assert!(!snap.has(SnapshotField::Ask));
        assert!(snap.ask.is_none());

        snap.apply(Tick::Price {
            field: PriceField::Ask,
            price: dec!(2.15),
        });
        snap.apply(Tick::OpenInterest(dec!(1200)));
        snap.apply(Tick::OpenInterest(dec!(5)));
        assert_eq!(snap.ask, Some(dec!(2.15)));
        assert_eq!(snap.open_interest, Some(dec!(1200)));
        assert!(snap.has_all(&[SnapshotField::Ask, SnapshotField::OpenInterest]));
        assert!(!snap.has_all(&[SnapshotField::Ask, SnapshotField::Gamma]));
    }

    #[test]
    fn contract_identity_prefers_con_id() {
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let a = Contract::option("SPX", "CBOE", "USD", expiry, dec!(5000), OptionRight::Call, 100);
        let mut b = a.clone();
        b.exchange = "SMART".to_string();
        assert!(a.same_instrument(&b));

        b.con_id = Some(7);
        let mut c = a.clone();
        c.con_id = Some(8);
        assert!(!b.same_instrument(&c));
        assert_eq!(a.display_name(), "SPX 5000C 2026-03-20");
    }
}
