//! Types for order lifecycle management.

use orb_broker::{BrokerError, Contract, RequestId};
use orb_core::SignalType;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// A bracket tracked from submission until one of its children closes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedPosition {
    pub parent_order_id: RequestId,
    pub take_profit_order_id: RequestId,
    pub stop_loss_order_id: RequestId,
    /// Resolved option contract.
    pub contract: Contract,
    pub quantity: u32,
    /// Current stop-loss trigger. Only ever raised.
    pub stop_price: Decimal,
    /// Tick used for the entry and for trailing-stop rounding.
    pub tick_size: Decimal,
    /// Per-share average fill price, set once the parent fills.
    pub avg_cost: Option<Decimal>,
    /// Highest milestone a stop adjustment was accepted for.
    pub milestone_level: u32,
}

impl TrackedPosition {
    #[must_use]
    pub const fn is_child(&self, order_id: RequestId) -> bool {
        order_id == self.take_profit_order_id || order_id == self.stop_loss_order_id
    }

    /// Profit in percent units of `current` over the average cost.
    #[must_use]
    pub fn profit_pct(&self, current: Decimal) -> Option<Decimal> {
        let avg = self.avg_cost.filter(|a| *a > Decimal::ZERO)?;
        Some((current / avg - Decimal::ONE) * Decimal::ONE_HUNDRED)
    }
}

/// Stop price and milestone to move a position to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopAdjustment {
    pub milestone_level: u32,
    pub stop_price: Decimal,
}

/// Reasons a trade is not placed or an order cannot be built.
#[derive(Debug, Error)]
pub enum TradeError {
    /// HOLD signals carry no trade.
    #[error("signal {0} is not actionable")]
    NotActionable(SignalType),

    #[error("strike universe is empty")]
    EmptyStrikeUniverse,

    /// The broker has no definition for the option.
    #[error("could not resolve contract {0}")]
    UnresolvedContract(String),

    /// Ask, last and close were all unavailable.
    #[error("no market price for {0}")]
    NoMarketPrice(String),

    /// Bracket prices or parent order are unusable.
    #[error("invalid bracket: {0}")]
    InvalidBracket(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl TradeError {
    pub fn invalid_bracket(reason: impl Into<String>) -> Self {
        Self::InvalidBracket(reason.into())
    }
}
