//! Single-assignment result handles.
//!
//! A [`WsFuture`] is created per message hash and settled exactly once by
//! the connection's message handler. Handles are cheap to clone; every clone
//! observes the same outcome.

use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Error;
use crate::Result;

/// Settlement state of a [`WsFuture`]
#[derive(Debug, Clone, PartialEq)]
pub enum FutureState<T> {
    /// Not settled yet
    Pending,
    /// Settled with a value
    Resolved(T),
    /// Settled with an error
    Rejected(Error),
}

struct Shared<T> {
    state: Mutex<FutureState<T>>,
    notify: Notify,
}

/// Handle to a value that a later inbound message will provide
///
/// The first `resolve` or `reject` wins; later calls return `false` and
/// change nothing. Awaiting a settled handle returns immediately.
///
/// # Example
///
/// ```rust
/// use exchange_stream::client::WsFuture;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let future = WsFuture::new();
/// let waiter = future.clone();
/// let task = tokio::spawn(async move { waiter.await });
///
/// assert!(future.resolve(42));
/// assert!(!future.resolve(7));
/// assert_eq!(task.await.unwrap(), Ok(42));
/// # }
/// ```
pub struct WsFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WsFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for WsFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.state.lock() {
            FutureState::Pending => "pending",
            FutureState::Resolved(_) => "resolved",
            FutureState::Rejected(_) => "rejected",
        };
        f.debug_struct("WsFuture").field("state", &state).finish()
    }
}

impl<T> Default for WsFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WsFuture<T> {
    /// Create a pending handle
    pub fn new() -> Self {
        Self::with_state(FutureState::Pending)
    }

    /// Create a handle that is already rejected
    pub fn rejected(error: Error) -> Self {
        Self::with_state(FutureState::Rejected(error))
    }

    fn with_state(state: FutureState<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                notify: Notify::new(),
            }),
        }
    }

    /// Settle with a value; returns whether this call settled the handle
    pub fn resolve(&self, value: T) -> bool {
        self.settle(FutureState::Resolved(value))
    }

    /// Settle with an error; returns whether this call settled the handle
    pub fn reject(&self, error: Error) -> bool {
        self.settle(FutureState::Rejected(error))
    }

    fn settle(&self, outcome: FutureState<T>) -> bool {
        {
            let mut state = self.shared.state.lock();
            if !matches!(*state, FutureState::Pending) {
                return false;
            }
            *state = outcome;
        }
        self.shared.notify.notify_waiters();
        true
    }

    /// Whether the handle is still unsettled
    pub fn is_pending(&self) -> bool {
        matches!(*self.shared.state.lock(), FutureState::Pending)
    }

    /// Whether two handles share the same state
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Clone> WsFuture<T> {
    /// Outcome if settled
    pub fn try_result(&self) -> Option<Result<T>> {
        match &*self.shared.state.lock() {
            FutureState::Pending => None,
            FutureState::Resolved(value) => Some(Ok(value.clone())),
            FutureState::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// Wait for the outcome
    pub async fn wait(&self) -> Result<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.try_result() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for WsFuture<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}
