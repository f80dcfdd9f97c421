use orb_broker::BrokerError;
use orb_core::ConfigError;
use orb_options_manager::TradeError;
use orb_strategy::GexError;
use thiserror::Error;

use crate::state::EngineState;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Gex(#[from] GexError),

    #[error(transparent)]
    Trade(#[from] TradeError),

    /// A stage ran without the data an earlier stage should have stored.
    #[error("{state} is missing {what}")]
    MissingContext {
        state: EngineState,
        what: &'static str,
    },

    #[error("no {outcome} transition out of {from}")]
    InvalidTransition {
        from: EngineState,
        outcome: &'static str,
    },
}
