//! Rate-limit gate consulted before subscription sends.

use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::Error;
use crate::Result;

/// Gate that delays an operation until its cost can be paid
pub trait Throttle: Send + Sync + 'static {
    /// Wait until `cost` tokens are available and consume them
    fn acquire(&self, cost: f64) -> BoxFuture<'_, ()>;
}

/// Throttle that never waits
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThrottle;

impl Throttle for NoThrottle {
    fn acquire(&self, _cost: f64) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = f64::min(self.capacity, self.tokens + elapsed * self.refill_rate);
        self.last_update = now;
    }

    /// Take `cost` tokens, or return how long until they are available
    fn take(&mut self, cost: f64) -> Option<Duration> {
        self.refill(Instant::now());
        if self.tokens >= cost {
            self.tokens -= cost;
            None
        } else {
            Some(Duration::from_secs_f64((cost - self.tokens) / self.refill_rate))
        }
    }
}

/// Token bucket refilled continuously at `refill_rate` tokens per second
///
/// Costs above the capacity are clamped to it, so a single expensive call
/// waits for a full bucket instead of forever.
#[derive(Debug)]
pub struct TokenBucket {
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// Create a full bucket
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] unless both values are positive and finite.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(capacity) || !valid(refill_rate) {
            return Err(Error::Config(format!(
                "token bucket needs a positive capacity and refill rate, got {} and {}",
                capacity, refill_rate
            )));
        }
        Ok(Self {
            bucket: Mutex::new(Bucket {
                capacity,
                tokens: capacity,
                refill_rate,
                last_update: Instant::now(),
            }),
        })
    }

    /// Tokens currently available
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }
}

impl Throttle for TokenBucket {
    fn acquire(&self, cost: f64) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            loop {
                let wait = {
                    let mut bucket = self.bucket.lock();
                    let cost = cost.clamp(0.0, bucket.capacity);
                    bucket.take(cost)
                };
                match wait {
                    None => return,
                    Some(wait) => tokio::time::sleep(wait).await,
                }
            }
        })
    }
}
