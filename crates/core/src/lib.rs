//! Core types, configuration and session clock shared by every crate in the
//! opening-range breakout trader.

pub mod config;
pub mod config_loader;
pub mod events;
pub mod session;

pub use config::{
    AppConfig, BreakoutConfig, ConfigError, ConnectionConfig, EngineConfig, EntryOrderType,
    GexConfig, GexProviderKind, InstrumentConfig, OpeningRangeConfig, RestProviderConfig,
    TickSizeConfig, TradeManagementConfig, TrailingStopConfig,
};
pub use config_loader::ConfigLoader;
pub use events::{Bar, OpeningRange, Signal, SignalType};
pub use session::{Clock, FixedClock, OpeningWindow, SystemClock};
