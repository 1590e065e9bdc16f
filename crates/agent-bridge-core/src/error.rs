//! Error taxonomy for transport and exchange failures.

use std::time::Duration;

use thiserror::Error;

/// Transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid remote address: {0}")]
    InvalidUrl(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Connection refused by server: {0}")]
    ConnectRefused(String),
    #[error("Session closed: {0}")]
    Closed(String),
}

/// Failure of one bridged exchange.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No terminal event and no candidate reply within the bound.
    #[error("Timeout waiting for response")]
    Timeout {
        /// The completion timeout that elapsed.
        after: Duration,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Exchange cancelled")]
    Cancelled,
}

impl BridgeError {
    /// Whether this is a completion timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
