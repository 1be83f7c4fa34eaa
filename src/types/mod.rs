//! Shared types for the streaming core.
//!
//! - [`Side`] - order book side
//! - [`MessageHash`], [`SubscribeHash`], [`OrderId`] - typed string keys
//! - [`record`] - traits that cache entries implement to expose their dedup keys

pub mod record;

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use record::{Identified, Sided, Symbolic, Timestamped};

/// Exchange sequence number used to order snapshots and deltas
pub type Nonce = u64;

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = i64;

/// Order book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy side; stored with a negated sort key
    Bid,
    /// Sell side; stored with the price as its sort key
    Ask,
}

impl Side {
    /// The other side of the book
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Short name as used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a key from any string-like value
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the key as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_key!(
    /// Identifies one pending response on a connection
    MessageHash
);

string_key!(
    /// Identifies one logical subscription on a connection
    SubscribeHash
);

/// Exchange order identifier
///
/// Ids made only of ASCII digits compare numerically (without parsing, so
/// arbitrarily long ids work); any other pair compares lexicographically.
/// The indexed ladder relies on this order for time priority at a level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Create an order id
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_numeric(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Ord for OrderId {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.is_numeric() && other.is_numeric() {
            let a = self.0.trim_start_matches('0');
            let b = other.0.trim_start_matches('0');
            a.len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                .then_with(|| self.0.cmp(&other.0))
        } else {
            self.0.cmp(&other.0)
        }
    }
}

impl PartialOrd for OrderId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for OrderId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for OrderId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side() {
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::Ask.to_string(), "ask");
        assert_eq!(serde_json::to_string(&Side::Bid).unwrap(), "\"bid\"");
    }

    #[test]
    fn test_order_id_numeric_order() {
        assert!(OrderId::from("9") < OrderId::from("10"));
        assert!(OrderId::from("0010") > OrderId::from("9"));
        assert!(OrderId::from(123_u64) < OrderId::from("124"));
        assert!(OrderId::from("abc") < OrderId::from("abd"));
        // digit strings sort before letters lexicographically
        assert!(OrderId::from("10") < OrderId::from("a"));
    }

    #[test]
    fn test_hash_keys() {
        let hash = MessageHash::from("orderbook:BTC/USDT");
        assert_eq!(hash.as_str(), "orderbook:BTC/USDT");
        assert_eq!(hash.to_string(), "orderbook:BTC/USDT");
        assert_eq!(
            serde_json::to_string(&SubscribeHash::new("trades")).unwrap(),
            "\"trades\""
        );
    }
}
