//! One WebSocket connection and the requests waiting on it.
//!
//! [`ConnectionClient`] owns the socket for one endpoint URL together with:
//!
//! - the table of pending [`WsFuture`]s, keyed by message hash
//! - errors for hashes that were rejected before anyone asked for them
//! - the set of subscriptions already sent on this connection
//!
//! Connecting is single-flight: every caller of [`ConnectionClient::connect`]
//! gets the same "connected" handle. Once open, a reader task feeds inbound
//! frames to the [`MessageHandler`] and a keep-alive task pings the peer.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use exchange_stream::client::{ConnectionClient, Incoming, TungsteniteConnector};
//! use exchange_stream::Config;
//!
//! # async fn example() -> exchange_stream::Result<()> {
//! let handler = |client: &ConnectionClient<String>, message: Incoming| {
//!     if let Incoming::Text(text) = message {
//!         client.resolve(text, "echo");
//!     }
//! };
//! let client = ConnectionClient::new(
//!     "wss://example.com/ws",
//!     Config::default(),
//!     Arc::new(TungsteniteConnector),
//!     Arc::new(handler),
//! );
//!
//! let reply = client.future("echo");
//! client.connect(Duration::ZERO).await?;
//! client.send(&serde_json::json!({"op": "echo"})).await?;
//! let text = reply.await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::types::{MessageHash, SubscribeHash};
use crate::Result;

use super::future::WsFuture;
use super::transport::{Connector, Incoming, MessageSink, MessageSource};

/// Receives every inbound data frame of a connection
///
/// Handlers decode the frame and settle futures through
/// [`ConnectionClient::resolve`] and [`ConnectionClient::reject`]. They run on
/// the reader task, so deltas are handled in socket order.
pub trait MessageHandler<T>: Send + Sync + 'static {
    /// Handle one text or binary frame
    fn handle_message(&self, client: &ConnectionClient<T>, message: Incoming);
}

impl<T, F> MessageHandler<T> for F
where
    F: Fn(&ConnectionClient<T>, Incoming) + Send + Sync + 'static,
{
    fn handle_message(&self, client: &ConnectionClient<T>, message: Incoming) {
        self(client, message)
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Created, connect not requested yet
    Idle,
    /// Handshake in flight
    Connecting,
    /// Handshake done, reader running
    Open,
    /// Torn down; terminal
    Closed,
}

/// How a connection went down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// Transport error, handshake or keep-alive timeout
    Error,
    /// Close frame or end of stream
    Close,
}

/// What a subscription was registered with
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionState {
    /// Subscribed, no extra state
    Subscribed,
    /// Subscribed with exchange-specific parameters
    Params(serde_json::Value),
}

/// Callback run after a connection went down
pub type DisconnectHook<T> = Arc<dyn Fn(&ConnectionClient<T>, Disconnect) + Send + Sync>;

struct ClientState<T> {
    status: ConnectionStatus,
    futures: FxHashMap<MessageHash, WsFuture<T>>,
    rejections: FxHashMap<MessageHash, Error>,
    subscriptions: FxHashMap<SubscribeHash, SubscriptionState>,
    error: Option<Error>,
}

struct Inner<T> {
    url: String,
    config: Config,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn MessageHandler<T>>,
    state: Mutex<ClientState<T>>,
    connected: WsFuture<()>,
    sink: AsyncMutex<Option<Box<dyn MessageSink>>>,
    last_pong: Mutex<Instant>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disconnect_hook: Mutex<Option<DisconnectHook<T>>>,
}

/// Connection to one endpoint, shared by every subscription on it
///
/// Cloning is cheap and every clone refers to the same connection.
pub struct ConnectionClient<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ConnectionClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ConnectionClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionClient")
            .field("url", &self.inner.url)
            .field("status", &state.status)
            .field("futures", &state.futures.len())
            .field("subscriptions", &state.subscriptions.len())
            .field("error", &state.error)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> ConnectionClient<T> {
    /// Create an idle client; nothing is opened until [`Self::connect`]
    pub fn new(
        url: impl Into<String>,
        config: Config,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn MessageHandler<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                config,
                connector,
                handler,
                state: Mutex::new(ClientState {
                    status: ConnectionStatus::Idle,
                    futures: FxHashMap::default(),
                    rejections: FxHashMap::default(),
                    subscriptions: FxHashMap::default(),
                    error: None,
                }),
                connected: WsFuture::new(),
                sink: AsyncMutex::new(None),
                last_pong: Mutex::new(Instant::now()),
                tasks: Mutex::new(Vec::new()),
                disconnect_hook: Mutex::new(None),
            }),
        }
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current lifecycle state
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// Error that tore the connection down, if any
    pub fn error(&self) -> Option<Error> {
        self.inner.state.lock().error.clone()
    }

    /// Whether both handles refer to the same connection
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `hook` after the connection goes down
    pub fn set_disconnect_hook(&self, hook: DisconnectHook<T>) {
        *self.inner.disconnect_hook.lock() = Some(hook);
    }

    /// Start the handshake unless it is already under way
    ///
    /// The handshake starts after `backoff`. Every call returns the same
    /// handle, resolved once the connection is open and rejected if it fails
    /// or is closed first. A closed client never reconnects: the returned
    /// handle is rejected with the recorded error, or
    /// [`Error::ClosedByCaller`] when none was recorded.
    pub fn connect(&self, backoff: Duration) -> WsFuture<()> {
        let start = {
            let mut state = self.inner.state.lock();
            match state.status {
                ConnectionStatus::Idle => {
                    state.status = ConnectionStatus::Connecting;
                    true
                }
                ConnectionStatus::Closed => {
                    let url = &self.inner.url;
                    let error = state.error.clone().unwrap_or_else(|| {
                        Error::ClosedByCaller(format!("connection to {} is closed", url))
                    });
                    return WsFuture::rejected(error);
                }
                _ => false,
            }
        };
        if start {
            self.spawn(self.clone().run_connect(backoff));
        }
        self.inner.connected.clone()
    }

    /// Pending future for `hash`, created if absent
    ///
    /// An error stored by an earlier [`Self::reject`] for this hash is
    /// consumed and returned as an already rejected future.
    pub fn future(&self, hash: impl Into<MessageHash>) -> WsFuture<T> {
        let hash = hash.into();
        let mut state = self.inner.state.lock();
        if let Some(future) = state.futures.get(&hash) {
            return future.clone();
        }
        if let Some(error) = state.rejections.remove(&hash) {
            return WsFuture::rejected(error);
        }
        let future = WsFuture::new();
        state.futures.insert(hash, future.clone());
        future
    }

    /// Resolve the future for `hash`
    ///
    /// The future leaves the table before it is resolved, so a waiter that
    /// asks again for the same hash gets a fresh one. Returns whether a
    /// future was waiting.
    pub fn resolve(&self, value: T, hash: impl Into<MessageHash>) -> bool {
        let future = self.inner.state.lock().futures.remove(&hash.into());
        match future {
            Some(future) => future.resolve(value),
            None => false,
        }
    }

    /// Reject the future for `hash`, or every pending future when `hash` is
    /// `None`
    ///
    /// Rejecting a hash nobody waits on stores the error for the next
    /// [`Self::future`] call with that hash.
    pub fn reject(&self, error: Error, hash: Option<MessageHash>) {
        let rejected: Vec<WsFuture<T>> = {
            let mut state = self.inner.state.lock();
            match hash {
                Some(hash) => match state.futures.remove(&hash) {
                    Some(future) => vec![future],
                    None => {
                        state.rejections.insert(hash, error);
                        return;
                    }
                },
                None => state.futures.drain().map(|(_, future)| future).collect(),
            }
        };
        for future in rejected {
            future.reject(error.clone());
        }
    }

    /// Reject the future for `hash` only if one is waiting; returns whether
    /// it was
    pub fn reject_pending(&self, error: Error, hash: &MessageHash) -> bool {
        let future = self.inner.state.lock().futures.remove(hash);
        match future {
            Some(future) => future.reject(error),
            None => false,
        }
    }

    /// Message hashes with a pending future
    pub fn pending_hashes(&self) -> Vec<MessageHash> {
        self.inner.state.lock().futures.keys().cloned().collect()
    }

    /// Register a subscription; returns `false` if it already existed
    pub fn subscribe(&self, hash: SubscribeHash, subscription: SubscriptionState) -> bool {
        let mut state = self.inner.state.lock();
        if state.subscriptions.contains_key(&hash) {
            return false;
        }
        state.subscriptions.insert(hash, subscription);
        true
    }

    /// Forget a subscription
    pub fn unsubscribe(&self, hash: &SubscribeHash) -> Option<SubscriptionState> {
        self.inner.state.lock().subscriptions.remove(hash)
    }

    /// Whether a subscription exists
    pub fn is_subscribed(&self, hash: &SubscribeHash) -> bool {
        self.inner.state.lock().subscriptions.contains_key(hash)
    }

    /// Registered subscription hashes
    pub fn subscriptions(&self) -> Vec<SubscribeHash> {
        self.inner.state.lock().subscriptions.keys().cloned().collect()
    }

    /// Serialize `message` to JSON and write it
    pub async fn send<M: Serialize + ?Sized>(&self, message: &M) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.send_text(text).await
    }

    /// Write a text frame
    pub async fn send_text(&self, text: String) -> Result<()> {
        let mut sink = self.inner.sink.lock().await;
        let sink = sink
            .as_mut()
            .ok_or_else(|| Error::Network(format!("not connected to {}", self.inner.url)))?;
        debug!(url = %self.inner.url, bytes = text.len(), "sending");
        sink.send_text(text).await
    }

    async fn ping(&self) -> Result<()> {
        let mut sink = self.inner.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.ping().await,
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Tear down after a transport failure
    ///
    /// Records the error, rejects every pending future with it and runs the
    /// disconnect hook. Ignored once the connection is already closed.
    pub fn on_error(&self, error: Error) {
        {
            let mut state = self.inner.state.lock();
            if state.status == ConnectionStatus::Closed {
                return;
            }
            state.status = ConnectionStatus::Closed;
            state.error = Some(error.clone());
        }
        warn!(url = %self.inner.url, %error, "connection failed");
        self.reset(error);
        self.spawn_close_sink();
        self.notify_disconnect(Disconnect::Error);
    }

    /// Tear down after the peer closed the connection
    ///
    /// Pending futures are rejected with a network error naming the close
    /// code; no error is recorded on the client. Ignored once the connection
    /// is already closed.
    pub fn on_close(&self, code: Option<u16>) {
        {
            let mut state = self.inner.state.lock();
            if state.status == ConnectionStatus::Closed {
                return;
            }
            state.status = ConnectionStatus::Closed;
        }
        let code = code.unwrap_or(1006);
        info!(url = %self.inner.url, code, "connection closed by remote server");
        self.reset(Error::Network(format!(
            "connection closed by remote server, closing code {}",
            code
        )));
        self.notify_disconnect(Disconnect::Close);
    }

    /// Close the connection, rejecting every pending future with
    /// [`Error::ClosedByCaller`]
    ///
    /// The disconnect hook runs as for a remote close, unless the connection
    /// was already down.
    pub async fn close(&self) {
        let was_closed = {
            let mut state = self.inner.state.lock();
            let was_closed = state.status == ConnectionStatus::Closed;
            state.status = ConnectionStatus::Closed;
            was_closed
        };
        self.reset(Error::ClosedByCaller(format!(
            "connection to {} closed by caller",
            self.inner.url
        )));
        self.close_sink().await;
        if !was_closed {
            info!(url = %self.inner.url, "connection closed by caller");
            self.notify_disconnect(Disconnect::Close);
        }
    }

    fn reset(&self, error: Error) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.connected.reject(error.clone());
        self.reject(error, None);
    }

    fn notify_disconnect(&self, event: Disconnect) {
        let hook = self.inner.disconnect_hook.lock().clone();
        if let Some(hook) = hook {
            hook(self, event);
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let closed = self.status() == ConnectionStatus::Closed;
        if closed {
            handle.abort();
        } else {
            self.inner.tasks.lock().push(handle);
        }
    }

    fn spawn_close_sink(&self) {
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let client = self.clone();
            runtime.spawn(async move { client.close_sink().await });
        }
    }

    async fn close_sink(&self) {
        let sink = self.inner.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(error) = sink.close().await {
                debug!(url = %self.inner.url, %error, "close handshake failed");
            }
        }
    }

    fn touch(&self) {
        *self.inner.last_pong.lock() = Instant::now();
    }

    async fn run_connect(self, backoff: Duration) {
        if !backoff.is_zero() {
            debug!(url = %self.inner.url, ?backoff, "delaying connect");
            tokio::time::sleep(backoff).await;
        }
        debug!(url = %self.inner.url, "connecting");
        let deadline = self.inner.config.connection_timeout();
        let handshake = self.inner.connector.connect(&self.inner.url);
        let (sink, source) = match tokio::time::timeout(deadline, handshake).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(error)) => {
                self.on_error(error);
                return;
            }
            Err(_) => {
                self.on_error(Error::RequestTimeout(format!(
                    "connection to {} timed out",
                    self.inner.url
                )));
                return;
            }
        };

        *self.inner.sink.lock().await = Some(sink);
        let opened = {
            let mut state = self.inner.state.lock();
            if state.status == ConnectionStatus::Connecting {
                state.status = ConnectionStatus::Open;
                true
            } else {
                false
            }
        };
        if !opened {
            self.close_sink().await;
            return;
        }

        self.touch();
        info!(url = %self.inner.url, "connected");
        self.spawn(self.clone().read_loop(source));
        if !self.inner.config.keep_alive().is_zero() {
            self.spawn(self.clone().keep_alive_loop());
        }
        self.inner.connected.resolve(());
    }

    async fn read_loop(self, mut source: Box<dyn MessageSource>) {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Incoming::Close(code)) => {
                    self.on_close(code);
                    return;
                }
                Ok(Incoming::Pong) => self.touch(),
                Ok(message) => {
                    self.touch();
                    self.inner.handler.handle_message(&self, message);
                }
                Err(error) => {
                    self.on_error(error);
                    return;
                }
            }
        }
        self.on_close(None);
    }

    async fn keep_alive_loop(self) {
        let period = self.inner.config.keep_alive();
        let deadline = self.inner.config.pong_deadline();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let silent = self.inner.last_pong.lock().elapsed();
            if silent > deadline {
                self.on_error(Error::RequestTimeout(format!(
                    "connection to {} timed out due to a ping-pong keepalive missing on time",
                    self.inner.url
                )));
                return;
            }
            if let Err(error) = self.ping().await {
                self.on_error(error);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::Connection;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Connector whose handshake never completes
    struct Hanging;

    impl Connector for Hanging {
        fn connect(&self, _url: &str) -> BoxFuture<'static, Result<Connection>> {
            Box::pin(futures_util::future::pending())
        }
    }

    /// Connector that fails immediately
    struct Refused;

    impl Connector for Refused {
        fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection>> {
            let error = Error::Network(format!("connection refused: {}", url));
            Box::pin(async move { Err(error) })
        }
    }

    struct ChannelSink(mpsc::UnboundedSender<String>);

    impl MessageSink for ChannelSink {
        fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
            let sent = self.0.send(text).map_err(|_| Error::ConnectionClosed);
            Box::pin(async move { sent })
        }

        fn ping(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct ChannelSource(mpsc::UnboundedReceiver<Incoming>);

    impl MessageSource for ChannelSource {
        fn next(&mut self) -> BoxFuture<'_, Option<Result<Incoming>>> {
            Box::pin(async move { self.0.recv().await.map(Ok) })
        }
    }

    /// Connector handing out one in-memory connection
    struct Loopback {
        parts: Mutex<Option<Connection>>,
        connects: AtomicUsize,
    }

    impl Connector for Loopback {
        fn connect(&self, _url: &str) -> BoxFuture<'static, Result<Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let parts = self.parts.lock().take().ok_or(Error::ConnectionClosed);
            Box::pin(async move { parts })
        }
    }

    fn loopback() -> (
        Arc<Loopback>,
        mpsc::UnboundedSender<Incoming>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Loopback {
            parts: Mutex::new(Some((
                Box::new(ChannelSink(outbound_tx)) as Box<dyn MessageSink>,
                Box::new(ChannelSource(inbound_rx)) as Box<dyn MessageSource>,
            ))),
            connects: AtomicUsize::new(0),
        });
        (connector, inbound_tx, outbound_rx)
    }

    fn echo_handler() -> Arc<dyn MessageHandler<String>> {
        Arc::new(|client: &ConnectionClient<String>, message: Incoming| {
            if let Incoming::Text(text) = message {
                client.resolve(text.clone(), text.as_str());
            }
        })
    }

    fn client(connector: Arc<dyn Connector>) -> ConnectionClient<String> {
        ConnectionClient::new("ws://test", Config::default(), connector, echo_handler())
    }

    #[test]
    fn test_future_is_reused_until_resolved() {
        let client = client(Arc::new(Refused));
        let first = client.future("trades");
        assert!(first.same_as(&client.future("trades")));

        assert!(client.resolve("ok".into(), "trades"));
        assert_eq!(first.try_result(), Some(Ok("ok".to_string())));

        let second = client.future("trades");
        assert!(!second.same_as(&first));
        assert!(second.is_pending());
        assert!(!client.resolve("late".into(), "other"));
    }

    #[test]
    fn test_rejection_is_stored_for_next_future() {
        let client = client(Arc::new(Refused));
        client.reject(Error::Exchange("bad symbol".into()), Some("ticker".into()));

        let future = client.future("ticker");
        assert_eq!(
            future.try_result(),
            Some(Err(Error::Exchange("bad symbol".into())))
        );
        // consumed
        assert!(client.future("ticker").is_pending());
    }

    #[test]
    fn test_reject_all() {
        let client = client(Arc::new(Refused));
        let a = client.future("a");
        let b = client.future("b");
        client.reject(Error::ConnectionClosed, None);

        assert_eq!(a.try_result(), Some(Err(Error::ConnectionClosed)));
        assert_eq!(b.try_result(), Some(Err(Error::ConnectionClosed)));
        assert!(client.pending_hashes().is_empty());
    }

    #[test]
    fn test_reject_pending_stores_nothing() {
        let client = client(Arc::new(Refused));
        let hash = MessageHash::new("book");
        assert!(!client.reject_pending(Error::ConnectionClosed, &hash));
        assert!(client.future("book").is_pending());

        let waiting = client.future("book");
        assert!(client.reject_pending(Error::ConnectionClosed, &hash));
        assert_eq!(waiting.try_result(), Some(Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_subscribe_claims_once() {
        let client = client(Arc::new(Refused));
        let hash = SubscribeHash::new("trades:BTC/USDT");
        assert!(client.subscribe(hash.clone(), SubscriptionState::Subscribed));
        assert!(!client.subscribe(hash.clone(), SubscriptionState::Subscribed));
        assert!(client.is_subscribed(&hash));

        assert_eq!(client.unsubscribe(&hash), Some(SubscriptionState::Subscribed));
        assert!(!client.is_subscribed(&hash));
    }

    #[tokio::test]
    async fn test_connect_is_single_flight() {
        let (connector, _inbound, _outbound) = loopback();
        let client = client(connector.clone());

        let first = client.connect(Duration::ZERO);
        let second = client.connect(Duration::ZERO);
        assert!(first.same_as(&second));

        first.await.unwrap();
        assert_eq!(client.status(), ConnectionStatus::Open);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_resolves_from_socket() {
        let (connector, inbound, mut outbound) = loopback();
        let client = client(connector);
        client.connect(Duration::ZERO).await.unwrap();

        let reply = client.future("pong");
        client.send(&"ping").await.unwrap();
        assert_eq!(outbound.recv().await.as_deref(), Some("\"ping\""));

        inbound.send(Incoming::Text("pong".into())).unwrap();
        assert_eq!(reply.await, Ok("pong".to_string()));
    }

    #[tokio::test]
    async fn test_refused_connection_rejects_with_error() {
        let client = client(Arc::new(Refused));
        let pending = client.future("x");

        let err = client.connect(Duration::ZERO).await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(pending.await, Err(err.clone()));
        assert_eq!(client.error(), Some(err));
        assert_eq!(client.status(), ConnectionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_timeout() {
        let config = Config::default().with_connection_timeout(Duration::from_secs(2));
        let client: ConnectionClient<String> =
            ConnectionClient::new("ws://slow", config, Arc::new(Hanging), echo_handler());

        let err = client.connect(Duration::ZERO).await.unwrap_err();
        assert_eq!(err, Error::RequestTimeout("connection to ws://slow timed out".into()));
    }

    #[tokio::test]
    async fn test_remote_close_rejects_pending() {
        let (connector, inbound, _outbound) = loopback();
        let client = client(connector);
        let closes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closes);
        client.set_disconnect_hook(Arc::new(move |_: &ConnectionClient<String>, event| {
            assert_eq!(event, Disconnect::Close);
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        client.connect(Duration::ZERO).await.unwrap();

        let pending = client.future("x");
        inbound.send(Incoming::Close(Some(1001))).unwrap();

        let err = pending.await.unwrap_err();
        assert_eq!(
            err,
            Error::Network("connection closed by remote server, closing code 1001".into())
        );
        assert_eq!(client.error(), None);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // a second teardown is ignored
        client.on_error(Error::ConnectionClosed);
        assert_eq!(client.error(), None);
    }

    #[tokio::test]
    async fn test_close_by_caller() {
        let (connector, _inbound, _outbound) = loopback();
        let client = client(connector.clone());
        let closes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closes);
        client.set_disconnect_hook(Arc::new(move |_: &ConnectionClient<String>, event| {
            assert_eq!(event, Disconnect::Close);
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        client.connect(Duration::ZERO).await.unwrap();
        let pending = client.future("x");

        client.close().await;
        assert!(pending.await.unwrap_err().is_closed_by_caller());
        assert!(client.send_text("late".into()).await.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // closed for good: no new handshake, no second hook call
        let err = client.connect(Duration::ZERO).await.unwrap_err();
        assert!(err.is_closed_by_caller());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        client.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_times_out_without_pong() {
        let (connector, _inbound, _outbound) = loopback();
        let config = Config::default()
            .with_keep_alive(Duration::from_secs(1))
            .with_max_ping_pong_misses(2.0);
        let client = ConnectionClient::new("ws://quiet", config, connector, echo_handler());
        client.connect(Duration::ZERO).await.unwrap();
        let pending = client.future("x");

        let err = pending.await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout(_)));
        assert_eq!(client.error(), Some(err));
    }
}
