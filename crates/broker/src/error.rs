//! Error types for the broker boundary and correlation layer.

use thiserror::Error;

use crate::types::RequestId;

/// Errors surfaced by [`crate::BrokerClient`] and transports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Transport could not connect.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A request was issued while the transport is disconnected.
    #[error("not connected to broker")]
    NotConnected,

    /// The connection dropped while a call was pending.
    #[error("connection lost")]
    ConnectionLost,

    /// No matching response before the call's deadline.
    #[error("timed out waiting for {operation} (req_id {req_id})")]
    Timeout {
        /// What was being waited for.
        operation: &'static str,
        /// Request id of the pending call; -1 when the call has none.
        req_id: RequestId,
    },

    /// Only events for other request ids arrived before the deadline.
    #[error("no event correlated with req_id {expected}; discarded {discarded} uncorrelated")]
    CorrelationMismatch {
        /// Request id the call was waiting on.
        expected: RequestId,
        /// Number of discarded events.
        discarded: usize,
    },

    /// The broker rejected the request.
    #[error("broker error {code} for req_id {req_id}: {message}")]
    Api {
        /// Request the error refers to.
        req_id: RequestId,
        /// Broker error code.
        code: i32,
        /// Broker message.
        message: String,
    },

    /// A request argument the transport cannot express.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The event channel was closed by the transport.
    #[error("event channel closed")]
    ChannelClosed,
}

impl BrokerError {
    pub const fn timeout(operation: &'static str, req_id: RequestId) -> Self {
        Self::Timeout { operation, req_id }
    }

    /// Returns true if the error means the session itself is unusable.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::NotConnected | Self::ConnectionLost | Self::ChannelClosed
        )
    }

    /// Returns true if the call ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if nothing for the awaited request arrived in time,
    /// whether or not events for other ids were discarded meanwhile.
    #[must_use]
    pub const fn is_silence(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::CorrelationMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_classification() {
        assert!(BrokerError::NotConnected.is_connectivity());
        assert!(BrokerError::ConnectionLost.is_connectivity());
        assert!(BrokerError::Connection("refused".into()).is_connectivity());
        assert!(!BrokerError::timeout("bars", 3).is_connectivity());
        assert!(BrokerError::timeout("bars", 3).is_timeout());
        assert!(!BrokerError::CorrelationMismatch {
            expected: 1,
            discarded: 2
        }
        .is_connectivity());
    }

    #[test]
    fn silence_covers_timeout_and_mismatch() {
        assert!(BrokerError::timeout("real-time bars", 3).is_silence());
        assert!(BrokerError::CorrelationMismatch {
            expected: 3,
            discarded: 1
        }
        .is_silence());
        assert!(!BrokerError::ConnectionLost.is_silence());
        assert!(!BrokerError::Api {
            req_id: 3,
            code: 200,
            message: "No security definition".into(),
        }
        .is_silence());
    }

    #[test]
    fn messages_carry_request_id() {
        let err = BrokerError::Api {
            req_id: 42,
            code: 200,
            message: "No security definition".into(),
        };
        assert_eq!(
            err.to_string(),
            "broker error 200 for req_id 42: No security definition"
        );
        assert_eq!(
            BrokerError::timeout("historical data", 7).to_string(),
            "timed out waiting for historical data (req_id 7)"
        );
    }
}
