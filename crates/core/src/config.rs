use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration problems. Fatal wherever they surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("GEX provider '{0}' selected but its [gex.providers] section is missing or incomplete")]
    MissingProvider(GexProviderKind),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub instrument: InstrumentConfig,
    pub opening_range: OpeningRangeConfig,
    pub breakout: BreakoutConfig,
    pub gex: GexConfig,
    pub trade_management: TradeManagementConfig,
    pub trade_execution: TradeExecutionConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Gateway/TWS host (use 127.0.0.1, not localhost).
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub ticker: String,
    pub exchange: String,
    pub currency: String,
    /// IANA name, e.g. "America/New_York".
    pub exchange_timezone: String,
}

impl InstrumentConfig {
    /// Parses the configured exchange timezone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTimezone`] for names chrono-tz does not know.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.exchange_timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.exchange_timezone.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningRangeConfig {
    /// Local exchange time, "HH:MM:SS".
    pub market_open_time: NaiveTime,
    pub duration_minutes: u32,
    /// Historical bar size in broker notation, e.g. "1 min".
    pub bar_size: String,
    pub wait_buffer_seconds: u64,
    pub historical_data_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutConfig {
    /// Aggregation window for breakout candles.
    pub bar_size_seconds: i64,
    #[serde(default = "default_realtime_bar_seconds")]
    pub realtime_bar_seconds: u32,
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GexProviderKind {
    Gexbot,
    Ib,
    MassiveData,
}

impl std::fmt::Display for GexProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gexbot => write!(f, "gexbot"),
            Self::Ib => write!(f, "ib"),
            Self::MassiveData => write!(f, "massive_data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GexConfig {
    pub provider: GexProviderKind,
    pub days_to_expiration: i64,
    pub strikes_quantity: usize,
    pub option_multiplier: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_collection_timeout")]
    pub collection_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub providers: GexProvidersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GexProvidersConfig {
    pub gexbot: Option<RestProviderConfig>,
    pub massive_data: Option<RestProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

impl RestProviderConfig {
    fn is_complete(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeManagementConfig {
    /// Percent units: 50 means +50%.
    pub take_profit_pct: Decimal,
    /// Percent units: 20 means -20%.
    pub stop_loss_pct: Decimal,
    pub trailing_stop: TrailingStopConfig,
    #[serde(default)]
    pub tick_size: TickSizeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    pub activation_profit_pct: Decimal,
    pub trail_pct: Decimal,
}

/// Price-banded tick schedule: `below` under `threshold`, `at_or_above` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickSizeConfig {
    pub threshold: Decimal,
    pub below: Decimal,
    pub at_or_above: Decimal,
}

impl Default for TickSizeConfig {
    // SPX option premium bands.
    fn default() -> Self {
        Self {
            threshold: Decimal::new(300, 2),
            below: Decimal::new(5, 2),
            at_or_above: Decimal::new(10, 2),
        }
    }
}

impl TickSizeConfig {
    /// A schedule with the same tick in every band.
    #[must_use]
    pub fn uniform(tick: Decimal) -> Self {
        Self {
            threshold: Decimal::ZERO,
            below: tick,
            at_or_above: tick,
        }
    }

    #[must_use]
    pub fn tick_for(&self, price: Decimal) -> Decimal {
        if price < self.threshold {
            self.below
        } else {
            self.at_or_above
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExecutionConfig {
    pub total_quantity: u32,
    #[serde(default)]
    pub order_defaults: OrderDefaultsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderDefaultsConfig {
    #[serde(default)]
    pub entry_order_type: EntryOrderType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOrderType {
    #[default]
    #[serde(rename = "LMT")]
    Limit,
    #[serde(rename = "MKT")]
    Market,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub step_interval_ms: u64,
    /// Timeout for single-shot and streaming broker calls.
    pub request_timeout_secs: u64,
    /// Deadline for market data snapshots.
    pub market_data_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_interval_ms: 100,
            request_timeout_secs: 10,
            market_data_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

const fn default_connect_timeout() -> u64 {
    10
}

const fn default_reconnect_backoff() -> u64 {
    5
}

const fn default_realtime_bar_seconds() -> u32 {
    5
}

const fn default_silence_timeout() -> u64 {
    30
}

const fn default_batch_size() -> usize {
    50
}

const fn default_batch_pause_ms() -> u64 {
    1000
}

const fn default_collection_timeout() -> u64 {
    20
}

const fn default_request_timeout() -> u64 {
    10
}

impl AppConfig {
    /// Checks every safety-relevant field. Nothing is silently defaulted here.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.instrument.timezone()?;

        if self.instrument.ticker.trim().is_empty() {
            return Err(ConfigError::invalid("instrument.ticker", "must not be empty"));
        }
        if self.opening_range.duration_minutes == 0 {
            return Err(ConfigError::invalid(
                "opening_range.duration_minutes",
                "must be positive",
            ));
        }
        if self.breakout.bar_size_seconds <= 0 {
            return Err(ConfigError::invalid(
                "breakout.bar_size_seconds",
                "must be positive",
            ));
        }
        if self.breakout.realtime_bar_seconds == 0 {
            return Err(ConfigError::invalid(
                "breakout.realtime_bar_seconds",
                "must be positive",
            ));
        }

        let tm = &self.trade_management;
        if tm.take_profit_pct <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "trade_management.take_profit_pct",
                "must be positive",
            ));
        }
        if tm.stop_loss_pct <= Decimal::ZERO || tm.stop_loss_pct >= Decimal::ONE_HUNDRED {
            return Err(ConfigError::invalid(
                "trade_management.stop_loss_pct",
                "must be in (0, 100)",
            ));
        }
        if tm.trailing_stop.activation_profit_pct <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "trade_management.trailing_stop.activation_profit_pct",
                "must be positive",
            ));
        }
        if tm.trailing_stop.trail_pct <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "trade_management.trailing_stop.trail_pct",
                "must be positive",
            ));
        }
        if tm.tick_size.below <= Decimal::ZERO || tm.tick_size.at_or_above <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "trade_management.tick_size",
                "tick sizes must be positive",
            ));
        }

        if self.trade_execution.total_quantity == 0 {
            return Err(ConfigError::invalid(
                "trade_execution.total_quantity",
                "must be positive",
            ));
        }

        if self.gex.strikes_quantity == 0 {
            return Err(ConfigError::invalid("gex.strikes_quantity", "must be positive"));
        }
        if self.gex.batch_size == 0 {
            return Err(ConfigError::invalid("gex.batch_size", "must be positive"));
        }
        let providers = &self.gex.providers;
        let rest = match self.gex.provider {
            GexProviderKind::Gexbot => Some(&providers.gexbot),
            GexProviderKind::MassiveData => Some(&providers.massive_data),
            GexProviderKind::Ib => None,
        };
        if let Some(section) = rest {
            if !section.as_ref().is_some_and(RestProviderConfig::is_complete) {
                return Err(ConfigError::MissingProvider(self.gex.provider));
            }
        }

        Ok(())
    }
}
