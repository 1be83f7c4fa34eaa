//! Configuration for the streaming core.
//!
//! This module provides the [`Config`] struct for connection deadlines,
//! keep-alive, resync retry bounds, topic fan-out limits and throttling, and
//! [`ReconnectConfig`] for the backoff applied before reconnecting to an
//! endpoint that failed.

use std::time::Duration;

/// Configuration for reconnection behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Failures after which the backoff stops growing (0 = no cap)
    ///
    /// Reconnects are never refused; this only bounds the backoff exponent.
    pub max_retries: u32,
    /// Initial delay between reconnection attempts
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnection attempts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure count at which the backoff stops growing (0 = no cap)
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay in milliseconds
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    /// Backoff to apply before the next connect, given the number of
    /// consecutive failures seen for an endpoint.
    ///
    /// No delay is applied before the first connect. Past `max_retries` the
    /// delay stays at its ceiling.
    pub fn backoff_after_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let attempt = if self.max_retries > 0 {
            (failures - 1).min(self.max_retries)
        } else {
            failures - 1
        };
        self.delay_for_attempt(attempt)
    }
}

/// Configuration for the streaming core
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use exchange_stream::Config;
///
/// let config = Config::new()
///     .with_connection_timeout(Duration::from_secs(5))
///     .with_order_book_max_retries(5)
///     .with_max_messages_per_topic(100);
///
/// assert_eq!(config.order_book_max_retries(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Handshake deadline
    connection_timeout: Duration,

    /// Ping cadence of an open connection
    keep_alive: Duration,

    /// How many keep-alive periods may pass without a pong
    max_ping_pong_misses: f64,

    /// Snapshot fetches per resync attempt
    order_book_max_retries: u32,

    /// Whole-procedure resync attempts after a snapshot fetch failure
    resync_max_attempts: u32,

    /// Messages retained per topic (0 = no history)
    max_messages_per_topic: usize,

    /// Per-consumer backlog bound
    max_consumer_backlog: usize,

    /// Consult the throttle before subscription sends
    enable_rate_limit: bool,

    /// Throttle cost of one subscription send
    ws_cost: f64,

    /// Backoff applied when reconnecting to a failed endpoint
    reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(30),
            max_ping_pong_misses: 2.0,
            order_book_max_retries: 3,
            resync_max_attempts: 2,
            max_messages_per_topic: 0,
            max_consumer_backlog: 1000,
            enable_rate_limit: true,
            ws_cost: 1.0,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handshake deadline
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the keep-alive ping interval
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set how many keep-alive periods may pass without a pong
    #[must_use]
    pub fn with_max_ping_pong_misses(mut self, misses: f64) -> Self {
        self.max_ping_pong_misses = misses;
        self
    }

    /// Set the number of snapshot fetches per resync attempt
    #[must_use]
    pub fn with_order_book_max_retries(mut self, retries: u32) -> Self {
        self.order_book_max_retries = retries;
        self
    }

    /// Set the total number of resync attempts (minimum 1)
    #[must_use]
    pub fn with_resync_max_attempts(mut self, attempts: u32) -> Self {
        self.resync_max_attempts = attempts.max(1);
        self
    }

    /// Set the number of messages retained per topic
    #[must_use]
    pub fn with_max_messages_per_topic(mut self, max: usize) -> Self {
        self.max_messages_per_topic = max;
        self
    }

    /// Set the per-consumer backlog bound
    #[must_use]
    pub fn with_max_consumer_backlog(mut self, max: usize) -> Self {
        self.max_consumer_backlog = max;
        self
    }

    /// Enable or disable the throttle gate
    #[must_use]
    pub fn with_rate_limit(mut self, enabled: bool) -> Self {
        self.enable_rate_limit = enabled;
        self
    }

    /// Set the throttle cost of one subscription send
    #[must_use]
    pub fn with_ws_cost(mut self, cost: f64) -> Self {
        self.ws_cost = cost;
        self
    }

    /// Set the reconnection backoff
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Get the handshake deadline
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Get the keep-alive interval
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Get the pong-miss tolerance
    pub fn max_ping_pong_misses(&self) -> f64 {
        self.max_ping_pong_misses
    }

    /// Longest silence tolerated between pongs
    pub fn pong_deadline(&self) -> Duration {
        self.keep_alive.mul_f64(self.max_ping_pong_misses)
    }

    /// Get the number of snapshot fetches per resync attempt
    pub fn order_book_max_retries(&self) -> u32 {
        self.order_book_max_retries
    }

    /// Get the total number of resync attempts
    pub fn resync_max_attempts(&self) -> u32 {
        self.resync_max_attempts
    }

    /// Get the number of messages retained per topic
    pub fn max_messages_per_topic(&self) -> usize {
        self.max_messages_per_topic
    }

    /// Get the per-consumer backlog bound
    pub fn max_consumer_backlog(&self) -> usize {
        self.max_consumer_backlog
    }

    /// Whether the throttle gate is consulted
    pub fn rate_limit_enabled(&self) -> bool {
        self.enable_rate_limit
    }

    /// Get the throttle cost of one subscription send
    pub fn ws_cost(&self) -> f64 {
        self.ws_cost
    }

    /// Get the reconnection backoff
    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::new();
        assert_eq!(config.connection_timeout(), Duration::from_secs(10));
        assert_eq!(config.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.order_book_max_retries(), 3);
        assert_eq!(config.resync_max_attempts(), 2);
        assert_eq!(config.max_messages_per_topic(), 0);
        assert_eq!(config.max_consumer_backlog(), 1000);
        assert!(config.rate_limit_enabled());
        assert_eq!(config.pong_deadline(), Duration::from_secs(60));
    }

    #[test]
    fn test_builder_pattern() {
        let config = Config::new()
            .with_connection_timeout(Duration::from_secs(3))
            .with_order_book_max_retries(7)
            .with_resync_max_attempts(0)
            .with_rate_limit(false)
            .with_ws_cost(2.5);

        assert_eq!(config.connection_timeout(), Duration::from_secs(3));
        assert_eq!(config.order_book_max_retries(), 7);
        // at least one attempt is always made
        assert_eq!(config.resync_max_attempts(), 1);
        assert!(!config.rate_limit_enabled());
        assert!((config.ws_cost() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.initial_delay_ms, 100);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delay_calculation() {
        let config = ReconnectConfig::new()
            .initial_delay_ms(100)
            .backoff_multiplier(2.0)
            .max_delay_ms(1000);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        // Should cap at max_delay_ms
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_after_failures() {
        let config = ReconnectConfig::new()
            .initial_delay_ms(100)
            .max_delay_ms(1000)
            .max_retries(2);

        assert_eq!(config.backoff_after_failures(0), Duration::ZERO);
        assert_eq!(config.backoff_after_failures(1), Duration::from_millis(100));
        assert_eq!(config.backoff_after_failures(2), Duration::from_millis(200));
        // capped by max_retries
        assert_eq!(config.backoff_after_failures(9), Duration::from_millis(400));

        // 0 only lifts the cap on the exponent
        let uncapped = config.max_retries(0).max_delay_ms(100_000);
        assert_eq!(uncapped.backoff_after_failures(5), Duration::from_millis(1600));
    }
}
