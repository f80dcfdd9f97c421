use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Stages of one trading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Connecting,
    GettingOpeningRange,
    MonitoringBreakout,
    AnalyzingGex,
    PendingTradeExecution,
    Shutdown,
}

impl EngineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::GettingOpeningRange => "GETTING_OPENING_RANGE",
            Self::MonitoringBreakout => "MONITORING_BREAKOUT",
            Self::AnalyzingGex => "ANALYZING_GEX",
            Self::PendingTradeExecution => "PENDING_TRADE_EXECUTION",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Applies a stage outcome.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] for an outcome the state cannot
    /// produce, such as `Reconnect` outside breakout monitoring or any
    /// progress out of `Shutdown`.
    pub fn next(self, outcome: &StageOutcome) -> Result<Self, EngineError> {
        use EngineState::{
            AnalyzingGex, Connecting, GettingOpeningRange, MonitoringBreakout,
            PendingTradeExecution, Shutdown,
        };

        let next = match (self, outcome) {
            (Shutdown, StageOutcome::Abort(_)) => Shutdown,
            (Shutdown, _) => {
                return Err(EngineError::InvalidTransition {
                    from: self,
                    outcome: outcome.label(),
                })
            }
            (_, StageOutcome::Abort(_)) => Shutdown,
            (state, StageOutcome::Stay) => state,
            (Connecting, StageOutcome::Advance) => GettingOpeningRange,
            (Connecting, StageOutcome::Resume) => MonitoringBreakout,
            (GettingOpeningRange, StageOutcome::Advance) => MonitoringBreakout,
            (MonitoringBreakout, StageOutcome::Advance) => AnalyzingGex,
            (MonitoringBreakout, StageOutcome::Reconnect) => Connecting,
            (AnalyzingGex, StageOutcome::Advance) => PendingTradeExecution,
            (PendingTradeExecution, StageOutcome::Advance) => Shutdown,
            (
                GettingOpeningRange | MonitoringBreakout | AnalyzingGex | PendingTradeExecution,
                StageOutcome::Resume,
            )
            | (
                Connecting | GettingOpeningRange | AnalyzingGex | PendingTradeExecution,
                StageOutcome::Reconnect,
            ) => {
                return Err(EngineError::InvalidTransition {
                    from: self,
                    outcome: outcome.label(),
                })
            }
        };
        Ok(next)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running one stage once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Stage finished; move to the next one in sequence.
    Advance,
    /// Stage needs another step.
    Stay,
    /// Reconnected with an opening range already known; skip straight back
    /// to breakout monitoring.
    Resume,
    /// The data feed went quiet and the transport is down.
    Reconnect,
    /// Stage failed; end the session.
    Abort(String),
}

impl StageOutcome {
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort(reason.into())
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Stay => "stay",
            Self::Resume => "resume",
            Self::Reconnect => "reconnect",
            Self::Abort(_) => "abort",
        }
    }
}
