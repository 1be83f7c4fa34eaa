//! In-memory transport for driving the hub without a network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use exchange_stream::client::{
    Connection, ConnectionClient, Connector, Incoming, MessageSink, MessageSource,
};
use exchange_stream::{Error, Result};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

pub const URL: &str = "wss://stream.test/ws";

/// Install a tracing subscriber once, honoring `RUST_LOG`
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
struct Shared {
    sent: Mutex<Vec<String>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<Incoming>>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
    fail_sends: AtomicBool,
}

/// Fake exchange endpoint
///
/// Every connect opens a fresh channel pair; frames pushed with
/// [`MockServer::push`] go to the latest connection.
#[derive(Clone, Default)]
pub struct MockServer {
    shared: Arc<Shared>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.shared.sent.lock().clone()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Deliver a frame on the current connection
    pub fn push(&self, frame: Incoming) {
        if let Some(inbound) = self.shared.inbound.lock().as_ref() {
            let _ = inbound.send(frame);
        }
    }

    /// Resolve `hash` with `value` through the test handler
    pub fn push_value(&self, hash: &str, value: &str) {
        let frame = serde_json::json!({"hash": hash, "value": value});
        self.push(Incoming::Text(frame.to_string()));
    }

    /// Wait until at least `n` messages were sent
    pub async fn wait_for_sends(&self, n: usize) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let sent = self.sent();
            if sent.len() >= n || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Connector for MockServer {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if self.shared.refuse.load(Ordering::SeqCst) {
            let error = Error::Network(format!("connection refused: {}", url));
            return Box::pin(async move { Err(error) });
        }
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        *self.shared.inbound.lock() = Some(inbound_tx);
        let sink = MockSink {
            shared: Arc::clone(&self.shared),
        };
        let source = MockSource { inbound: inbound_rx };
        Box::pin(async move {
            Ok((
                Box::new(sink) as Box<dyn MessageSink>,
                Box::new(source) as Box<dyn MessageSource>,
            ))
        })
    }
}

struct MockSink {
    shared: Arc<Shared>,
}

impl MessageSink for MockSink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
        let result = if self.shared.fail_sends.load(Ordering::SeqCst) {
            Err(Error::Network("broken pipe".into()))
        } else {
            self.shared.sent.lock().push(text);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn ping(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

struct MockSource {
    inbound: mpsc::UnboundedReceiver<Incoming>,
}

impl MessageSource for MockSource {
    fn next(&mut self) -> BoxFuture<'_, Option<Result<Incoming>>> {
        Box::pin(async move { self.inbound.recv().await.map(Ok) })
    }
}

/// Handler resolving `{"hash", "value"}` frames and rejecting
/// `{"hash", "error"}` frames
pub fn json_handler(client: &ConnectionClient<String>, message: Incoming) {
    let Incoming::Text(text) = message else {
        return;
    };
    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
        return;
    };
    let Some(hash) = frame["hash"].as_str() else {
        return;
    };
    if let Some(value) = frame["value"].as_str() {
        client.resolve(value.to_string(), hash);
    } else if let Some(error) = frame["error"].as_str() {
        client.reject(Error::Exchange(error.to_string()), Some(hash.into()));
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
