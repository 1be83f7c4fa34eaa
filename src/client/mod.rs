//! WebSocket connection plumbing.
//!
//! This module contains:
//!
//! - [`future`] - single-assignment result handles keyed by message hash
//! - [`connection`] - one connection, its pending futures and subscriptions
//! - [`transport`] - the socket seam and its `tokio-tungstenite` implementation
//! - [`throttle`] - rate-limit gate for subscription sends

pub mod connection;
pub mod future;
pub mod throttle;
pub mod transport;

pub use connection::{
    ConnectionClient, ConnectionStatus, Disconnect, DisconnectHook, MessageHandler,
    SubscriptionState,
};
pub use future::{FutureState, WsFuture};
pub use throttle::{NoThrottle, Throttle, TokenBucket};
pub use transport::{
    Connection, Connector, Incoming, MessageSink, MessageSource, TungsteniteConnector,
};
