//! Registry of connections and the entry points that drive them.
//!
//! [`StreamHub`] keeps one [`ConnectionClient`] per endpoint URL. Its
//! [`watch`](StreamHub::watch) call either reuses a pending request or
//! registers a subscription, connects and sends the subscribe message once.
//! The hub also owns the per-symbol order books and the topic fan-out, and
//! runs the snapshot resync of a book through [`SnapshotSource`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use exchange_stream::client::{ConnectionClient, Incoming};
//! use exchange_stream::hub::StreamHub;
//! use exchange_stream::types::SubscribeHash;
//! use exchange_stream::Config;
//!
//! # async fn example() -> exchange_stream::Result<()> {
//! let handler = |client: &ConnectionClient<String>, message: Incoming| {
//!     if let Incoming::Text(text) = message {
//!         client.resolve(text, "ticker:BTC/USDT");
//!     }
//! };
//! let hub: StreamHub<String> = StreamHub::new(Config::default(), Arc::new(handler));
//!
//! let ticker = hub
//!     .watch(
//!         "wss://example.com/ws",
//!         "ticker:BTC/USDT",
//!         Some(serde_json::json!({"op": "subscribe", "args": ["ticker.BTCUSDT"]})),
//!         Some(SubscribeHash::new("ticker:BTC/USDT")),
//!         None,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::IntoFuture;
use std::sync::{Arc, Weak};

use futures_util::future::{select_all, BoxFuture};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{
    ConnectionClient, ConnectionStatus, Connector, Disconnect, MessageHandler, NoThrottle,
    SubscriptionState, Throttle, TungsteniteConnector, WsFuture,
};
use crate::config::Config;
use crate::error::Error;
use crate::orderbook::{
    BookDelta, BookRegistry, BookSnapshot, LadderLevel, OrderBook, PriceLevel,
};
use crate::topic::TopicStream;
use crate::types::{MessageHash, SubscribeHash};
use crate::Result;

/// REST side of an order book resync
pub trait SnapshotSource<L: LadderLevel>: Send + Sync {
    /// Fetch a full snapshot of `symbol`
    fn fetch_order_book(&self, symbol: &str) -> BoxFuture<'_, Result<BookSnapshot<L>>>;

    /// Position in `deltas` from which to replay on top of `snapshot`
    ///
    /// `None` means the snapshot cannot be reconciled with the buffer and
    /// another one must be fetched. Defaults to [`nonce_cache_index`].
    fn cache_index(&self, snapshot: &BookSnapshot<L>, deltas: &[BookDelta<L>]) -> Option<usize> {
        nonce_cache_index(snapshot, deltas)
    }
}

/// Reconciliation point by sequence number
///
/// - a snapshot without a nonce replays the whole buffer
/// - a snapshot older than the first buffered delta leaves a gap: `None`
/// - otherwise the first delta newer than the snapshot, or the buffer
///   length when the snapshot covers every buffered delta
///
/// Deltas without a nonce count as newer than any snapshot.
pub fn nonce_cache_index<L: LadderLevel>(
    snapshot: &BookSnapshot<L>,
    deltas: &[BookDelta<L>],
) -> Option<usize> {
    let Some(nonce) = snapshot.nonce else {
        return Some(0);
    };
    if let Some(first) = deltas.first().and_then(|delta| delta.nonce) {
        if nonce.saturating_add(1) < first {
            return None;
        }
    }
    let index = deltas
        .iter()
        .position(|delta| delta.nonce.map_or(true, |n| n > nonce))
        .unwrap_or(deltas.len());
    Some(index)
}

type ClientMap<T> = Mutex<FxHashMap<String, ConnectionClient<T>>>;
type FailureMap = Mutex<FxHashMap<String, u32>>;

/// Connection registry, order books and topic fan-out
///
/// `T` is the value futures resolve with; `L` the order book level type.
pub struct StreamHub<T, L: LadderLevel = PriceLevel> {
    config: Config,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn MessageHandler<T>>,
    throttle: Arc<dyn Throttle>,
    clients: Arc<ClientMap<T>>,
    failures: Arc<FailureMap>,
    books: Arc<BookRegistry<L>>,
    topics: TopicStream<T>,
}

impl<T, L: LadderLevel> fmt::Debug for StreamHub<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHub")
            .field("clients", &self.clients.lock().keys().collect::<Vec<_>>())
            .field("books", &self.books.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<T, L> StreamHub<T, L>
where
    T: Clone + Send + Sync + 'static,
    L: LadderLevel,
{
    /// Create a hub connecting through `tokio-tungstenite`, without throttling
    pub fn new(config: Config, handler: Arc<dyn MessageHandler<T>>) -> Self {
        let topics = TopicStream::from_config(&config);
        Self {
            config,
            connector: Arc::new(TungsteniteConnector),
            handler,
            throttle: Arc::new(NoThrottle),
            clients: Arc::new(Mutex::new(FxHashMap::default())),
            failures: Arc::new(Mutex::new(FxHashMap::default())),
            books: Arc::new(BookRegistry::new()),
            topics,
        }
    }

    /// Use `connector` to open connections
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Gate subscription sends through `throttle`
    #[must_use]
    pub fn with_throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    /// Share an existing book registry, typically one the message handler
    /// also holds
    #[must_use]
    pub fn with_books(mut self, books: Arc<BookRegistry<L>>) -> Self {
        self.books = books;
        self
    }

    /// Share an existing topic stream
    #[must_use]
    pub fn with_topics(mut self, topics: TopicStream<T>) -> Self {
        self.topics = topics;
        self
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Per-symbol order books
    pub fn books(&self) -> &Arc<BookRegistry<L>> {
        &self.books
    }

    /// Topic fan-out
    pub fn topics(&self) -> &TopicStream<T> {
        &self.topics
    }

    /// Client for `url`, created if absent or closed
    pub fn client(&self, url: &str) -> ConnectionClient<T> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(url) {
            if client.status() != ConnectionStatus::Closed {
                return client.clone();
            }
        }
        let client = ConnectionClient::new(
            url,
            self.config.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.handler),
        );
        let registry = Arc::downgrade(&self.clients);
        let failures = Arc::downgrade(&self.failures);
        client.set_disconnect_hook(Arc::new(
            move |client: &ConnectionClient<T>, event: Disconnect| {
                release_client(&registry, &failures, client, event);
            },
        ));
        clients.insert(url.to_owned(), client.clone());
        client
    }

    /// Registered client for `url`, if any
    pub fn get_client(&self, url: &str) -> Option<ConnectionClient<T>> {
        self.clients.lock().get(url).cloned()
    }

    /// URLs with a registered client
    pub fn urls(&self) -> Vec<String> {
        self.clients.lock().keys().cloned().collect()
    }

    /// Consecutive connection failures recorded for `url`
    pub fn failures(&self, url: &str) -> u32 {
        self.failures.lock().get(url).copied().unwrap_or(0)
    }

    /// Subscribe or reuse
    ///
    /// Without a `subscribe_hash` an outstanding future for `message_hash` is
    /// returned as is. Otherwise the subscription is claimed on the client,
    /// the client connects, and only the caller that claimed it sends
    /// `message`. A failed connect or send releases the claim and rejects
    /// the returned future.
    pub fn watch(
        &self,
        url: &str,
        message_hash: impl Into<MessageHash>,
        message: Option<Value>,
        subscribe_hash: Option<SubscribeHash>,
        subscription: Option<SubscriptionState>,
    ) -> WsFuture<T> {
        let message_hash = message_hash.into();
        let client = self.client(url);
        if subscribe_hash.is_none() && client.pending_hashes().contains(&message_hash) {
            return client.future(message_hash);
        }

        let future = client.future(message_hash.clone());
        let claimed = match subscribe_hash {
            Some(hash) => {
                let state = subscription.unwrap_or(SubscriptionState::Subscribed);
                if client.subscribe(hash.clone(), state) {
                    vec![hash]
                } else {
                    // already subscribed: wait for the next update only
                    self.connect(&client);
                    return future;
                }
            }
            None => Vec::new(),
        };

        let pending = vec![(message_hash, future.clone())];
        self.subscribe_and_send(client, message, claimed, pending);
        future
    }

    /// Watch several hashes; resolves with the first one that settles
    ///
    /// Subscribe hashes not yet registered on the client are claimed and
    /// `message` is sent once for all of them.
    pub fn watch_multiple(
        &self,
        url: &str,
        message_hashes: &[MessageHash],
        message: Option<Value>,
        subscribe_hashes: &[SubscribeHash],
        subscription: Option<SubscriptionState>,
    ) -> BoxFuture<'static, Result<T>> {
        let client = self.client(url);
        let pending: Vec<(MessageHash, WsFuture<T>)> = message_hashes
            .iter()
            .map(|hash| (hash.clone(), client.future(hash.clone())))
            .collect();
        let state = subscription.unwrap_or(SubscriptionState::Subscribed);
        let claimed: Vec<SubscribeHash> = subscribe_hashes
            .iter()
            .filter(|hash| client.subscribe((*hash).clone(), state.clone()))
            .cloned()
            .collect();

        let futures: Vec<_> = pending
            .iter()
            .map(|(_, future)| future.clone().into_future())
            .collect();
        if claimed.is_empty() {
            self.connect(&client);
        } else {
            self.subscribe_and_send(client, message, claimed, pending);
        }

        Box::pin(async move {
            if futures.is_empty() {
                return Err(Error::Validation("no message hashes to watch".into()));
            }
            let (result, _, _) = select_all(futures).await;
            result
        })
    }

    fn connect(&self, client: &ConnectionClient<T>) -> WsFuture<()> {
        let backoff = self
            .config
            .reconnect()
            .backoff_after_failures(self.failures(client.url()));
        client.connect(backoff)
    }

    fn subscribe_and_send(
        &self,
        client: ConnectionClient<T>,
        message: Option<Value>,
        claimed: Vec<SubscribeHash>,
        pending: Vec<(MessageHash, WsFuture<T>)>,
    ) {
        let connected = self.connect(&client);
        let throttle = self.config.rate_limit_enabled().then(|| Arc::clone(&self.throttle));
        let cost = self.config.ws_cost();
        let failures = Arc::clone(&self.failures);

        tokio::spawn(async move {
            let outcome = match connected.wait().await {
                Ok(()) => {
                    failures.lock().remove(client.url());
                    match message {
                        Some(message) => {
                            if let Some(throttle) = throttle {
                                throttle.acquire(cost).await;
                            }
                            client.send(&message).await
                        }
                        None => Ok(()),
                    }
                }
                Err(error) => Err(error),
            };
            if let Err(error) = outcome {
                warn!(url = %client.url(), %error, "subscription failed");
                for hash in &claimed {
                    client.unsubscribe(hash);
                }
                for (hash, future) in pending {
                    if future.is_pending() {
                        client.reject(error.clone(), Some(hash));
                    }
                }
            } else if !claimed.is_empty() {
                debug!(url = %client.url(), subscriptions = ?claimed, "subscribed");
            }
        });
    }

    /// Tear `client` down after a transport error
    pub fn on_error(&self, client: &ConnectionClient<T>, error: Error) {
        client.on_error(error);
    }

    /// Tear `client` down after the peer closed it
    pub fn on_close(&self, client: &ConnectionClient<T>, code: Option<u16>) {
        client.on_close(code);
    }

    /// Forget `client` if it is still the registered one for its URL
    pub fn remove_client(&self, client: &ConnectionClient<T>) -> bool {
        let mut clients = self.clients.lock();
        match clients.get(client.url()) {
            Some(registered) if registered.same_as(client) => {
                clients.remove(client.url());
                true
            }
            _ => false,
        }
    }

    /// Close every client and the topic stream
    ///
    /// Pending futures are rejected with [`Error::ClosedByCaller`].
    pub async fn close(&self) {
        let clients: Vec<_> = self.clients.lock().drain().map(|(_, c)| c).collect();
        for client in clients {
            client.close().await;
        }
        self.topics.close();
        info!("stream hub closed");
    }
}

impl<T, L> StreamHub<T, L>
where
    T: Clone + Send + Sync + 'static + From<OrderBook<L>>,
    L: LadderLevel,
{
    /// Resynchronize `symbol` from a REST snapshot
    ///
    /// Deltas arriving meanwhile are buffered. Each attempt fetches up to
    /// `order_book_max_retries` snapshots until one can be reconciled with
    /// the buffer; on success the rebuilt book resolves `message_hash`. A
    /// failed fetch rejects the future waiting on `message_hash` with the
    /// fetch error and starts a new attempt, up to `resync_max_attempts`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] if the symbol has no book
    /// - [`Error::StaleCache`] if no snapshot could be reconciled; the
    ///   client and the book are dropped
    /// - the last fetch error once every attempt failed
    ///
    /// The same error rejects the future for `message_hash`, unless a failed
    /// fetch already rejected it and nobody asked again since.
    pub async fn load_order_book<S>(
        &self,
        url: &str,
        symbol: &str,
        message_hash: impl Into<MessageHash>,
        source: &S,
    ) -> Result<OrderBook<L>>
    where
        S: SnapshotSource<L> + ?Sized,
    {
        let hash = message_hash.into();
        let client = self.client(url);
        if !self.books.contains(symbol) {
            let error =
                Error::NotInitialized(format!("order book for {} is not initialized", symbol));
            client.reject(error.clone(), Some(hash));
            return Err(error);
        }
        self.books.mark_needs_resync(symbol);

        let retries = self.config.order_book_max_retries().max(1);
        let attempts = self.config.resync_max_attempts().max(1);
        let mut last_error = None;
        let mut rejected = false;
        for attempt in 1..=attempts {
            match self.resync(symbol, source, retries).await {
                Ok(Some(book)) => {
                    info!(symbol, attempt, nonce = ?book.nonce(), "order book synchronized");
                    client.resolve(T::from(book.clone()), hash);
                    return Ok(book);
                }
                Ok(None) => {
                    let error = Error::StaleCache(format!(
                        "nonce is behind the cache after {} tries",
                        retries
                    ));
                    warn!(symbol, %error, "giving up on order book resync");
                    client.reject(error.clone(), Some(hash));
                    self.remove_client(&client);
                    self.books.remove_market(symbol);
                    return Err(error);
                }
                Err(error) => {
                    warn!(symbol, attempt, attempts, %error, "order book snapshot failed");
                    rejected |= client.reject_pending(error.clone(), &hash);
                    last_error = Some(error);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            Error::StaleCache(format!("order book resync for {} did not run", symbol))
        });
        if rejected {
            client.reject_pending(error.clone(), &hash);
        } else {
            client.reject(error.clone(), Some(hash));
        }
        Err(error)
    }

    async fn resync<S>(
        &self,
        symbol: &str,
        source: &S,
        retries: u32,
    ) -> Result<Option<OrderBook<L>>>
    where
        S: SnapshotSource<L> + ?Sized,
    {
        for tries in 1..=retries {
            let snapshot = source.fetch_order_book(symbol).await?;
            let index = self
                .books
                .with_book(symbol, |book| source.cache_index(&snapshot, book.pending_deltas()))
                .ok_or_else(|| Error::NotInitialized(format!("no order book for {}", symbol)))?;
            match index {
                Some(index) => return self.books.reconcile(symbol, snapshot, index).map(Some),
                None => debug!(
                    symbol,
                    tries,
                    nonce = ?snapshot.nonce,
                    "snapshot is behind the buffered deltas"
                ),
            }
        }
        Ok(None)
    }
}

fn release_client<T: Clone + Send + Sync + 'static>(
    registry: &Weak<ClientMap<T>>,
    failures: &Weak<FailureMap>,
    client: &ConnectionClient<T>,
    event: Disconnect,
) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let errored = client.error().is_some();
    match event {
        Disconnect::Error if !errored => return,
        // the error path already released it
        Disconnect::Close if errored => return,
        _ => {}
    }
    let removed = {
        let mut clients = registry.lock();
        match clients.get(client.url()) {
            Some(registered) if registered.same_as(client) => {
                clients.remove(client.url()).is_some()
            }
            _ => false,
        }
    };
    if !removed {
        return;
    }
    if event == Disconnect::Error {
        if let Some(failures) = failures.upgrade() {
            *failures.lock().entry(client.url().to_owned()).or_insert(0) += 1;
        }
    }
    info!(url = %client.url(), ?event, "client released");
}
