//! Session state machine for the opening-range breakout trader.
//!
//! [`Engine`] sequences one trading session: connect, measure the opening
//! range, watch for a breakout, resolve the max-gamma strike and submit a
//! bracket. Each stage is an [`EngineState`]; stage results are
//! [`StageOutcome`]s fed through [`EngineState::next`].

pub mod engine;
pub mod error;
pub mod state;

pub use engine::Engine;
pub use error::EngineError;
pub use state::{EngineState, StageOutcome};
