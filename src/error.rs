//! Error types for the exchange-stream crate.
//!
//! This module defines the errors that can surface from the streaming core:
//! transport failures, handshake and keep-alive deadlines, caller shutdown,
//! order book resynchronization failures and malformed deltas.
//!
//! [`Error`] is `Clone` because a single transport failure is broadcast to
//! every pending future of a connection. Foreign errors are therefore kept as
//! their rendered message.

use thiserror::Error;

/// The main error type for this crate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Transport failure (socket error, remote close, write failure)
    #[error("network error: {0}")]
    Network(String),

    /// Handshake or keep-alive deadline elapsed
    #[error("request timeout: {0}")]
    RequestTimeout(String),

    /// The connection was closed by the caller
    #[error("connection closed by caller: {0}")]
    ClosedByCaller(String),

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// Resync exhausted its retries without finding a reconciliation point
    #[error("stale cache: {0}")]
    StaleCache(String),

    /// Operation on a symbol that has no order book yet
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Malformed delta or snapshot shape
    #[error("validation error: {0}")]
    Validation(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid configuration (bad URL, bad settings)
    #[error("configuration error: {0}")]
    Config(String),

    /// Error raised by an external collaborator (snapshot source, decoder)
    #[error("exchange error: {0}")]
    Exchange(String),

    /// A topic consumer callback failed
    #[error("consumer function error: {0}")]
    ConsumerFunction(String),
}

impl Error {
    /// Check if the error came from the transport layer
    ///
    /// Transport errors are broadcast to every pending future of a client and
    /// usually warrant a reconnect.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::RequestTimeout(_) | Error::ConnectionClosed
        )
    }

    /// Check if the error means the connection was shut down on purpose
    pub fn is_closed_by_caller(&self) -> bool {
        matches!(self, Error::ClosedByCaller(_))
    }

    /// Check if retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::RequestTimeout(_)
                | Error::ConnectionClosed
                | Error::StaleCache(_)
                | Error::Exchange(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Error::ConnectionClosed,
            other => Error::Network(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid URL: {}", err))
    }
}

impl From<rust_decimal::Error> for Error {
    fn from(err: rust_decimal::Error) -> Self {
        Error::Validation(err.to_string())
    }
}
