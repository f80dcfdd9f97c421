use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV bar. Only the in-progress candle of an aggregator is ever mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    #[must_use]
    pub const fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub signal_type: SignalType,
    /// Tag of the strategy that produced the signal.
    pub strategy: String,
    pub price: Option<Decimal>,
}

impl Signal {
    pub fn hold(timestamp: DateTime<Utc>, symbol: &str, strategy: &str) -> Self {
        Self {
            timestamp,
            symbol: symbol.to_string(),
            signal_type: SignalType::Hold,
            strategy: strategy.to_string(),
            price: None,
        }
    }

    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.signal_type != SignalType::Hold
    }
}

/// High/low of the opening window. Computed once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningRange {
    pub high: Decimal,
    pub low: Decimal,
}

impl OpeningRange {
    #[must_use]
    pub fn width(&self) -> Decimal {
        self.high - self.low
    }
}
