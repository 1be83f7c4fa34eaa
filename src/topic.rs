//! Topic fan-out.
//!
//! [`TopicStream`] numbers every message produced on a topic and delivers it
//! to each subscribed consumer. Every consumer owns a bounded backlog drained
//! by its own task, strictly in index order:
//!
//! - a synchronous consumer finishes its callback before the next message
//! - an asynchronous consumer has each callback spawned, but messages are
//!   still taken from the backlog in order
//!
//! A callback error is handed back to the same consumer once, as a message
//! carrying [`Error::ConsumerFunction`].
//!
//! # Example
//!
//! ```rust
//! use exchange_stream::topic::TopicStream;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let stream = TopicStream::new(10, 100);
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! stream.subscribe("trades", true, move |message| {
//!     let tx = tx.clone();
//!     async move {
//!         let _ = tx.send(message.payload);
//!         Ok(())
//!     }
//! });
//! stream.produce("trades", 42u32, None);
//!
//! assert_eq!(rx.recv().await, Some(42));
//! assert_eq!(stream.message_history("trades").len(), 1);
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Error;
use crate::Result;

/// A numbered message on a topic
#[derive(Debug, Clone, PartialEq)]
pub struct Message<P> {
    /// Topic name
    pub topic: String,
    /// Position on the topic; starts at 1 and strictly increases
    pub index: u64,
    /// Payload
    pub payload: P,
    /// Error attached by the producer, or the consumer's own callback error
    pub error: Option<Error>,
}

/// Identifies a consumer within a [`TopicStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Boxed consumer callback
pub type ConsumerCallback<P> =
    Arc<dyn Fn(Message<P>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Backlog<P> {
    queue: VecDeque<Message<P>>,
    last_seen: u64,
    draining: bool,
    closed: bool,
}

/// One subscriber of a topic
pub struct Consumer<P> {
    id: ConsumerId,
    topic: String,
    callback: ConsumerCallback<P>,
    synchronous: bool,
    max_backlog: usize,
    backlog: Mutex<Backlog<P>>,
}

impl<P> fmt::Debug for Consumer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backlog = self.backlog.lock();
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("synchronous", &self.synchronous)
            .field("last_seen", &backlog.last_seen)
            .field("backlog", &backlog.queue.len())
            .finish()
    }
}

impl<P: Clone + Send + Sync + 'static> Consumer<P> {
    /// Consumer id
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Index of the last message handed to the callback
    pub fn last_seen_index(&self) -> u64 {
        self.backlog.lock().last_seen
    }

    /// Messages waiting in the backlog
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().queue.len()
    }

    /// Queue `message` and start draining if no drain is running
    ///
    /// When the backlog is full its oldest entry is dropped.
    pub fn publish(self: &Arc<Self>, message: Message<P>) {
        {
            let mut backlog = self.backlog.lock();
            if backlog.closed {
                return;
            }
            if self.max_backlog > 0 && backlog.queue.len() >= self.max_backlog {
                if let Some(dropped) = backlog.queue.pop_front() {
                    warn!(
                        consumer = %self.id,
                        topic = %self.topic,
                        index = dropped.index,
                        "consumer backlog full, dropping oldest message"
                    );
                }
            }
            backlog.queue.push_back(message);
            if backlog.draining {
                return;
            }
            backlog.draining = true;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(Arc::clone(self).drain());
            }
            Err(_) => {
                warn!(consumer = %self.id, "no runtime to deliver messages on");
                self.backlog.lock().draining = false;
            }
        }
    }

    fn close(&self) {
        let mut backlog = self.backlog.lock();
        backlog.closed = true;
        backlog.queue.clear();
    }

    fn next_message(&self) -> Option<Message<P>> {
        let mut backlog = self.backlog.lock();
        while let Some(message) = backlog.queue.pop_front() {
            if message.index <= backlog.last_seen {
                debug!(consumer = %self.id, index = message.index, "skipping replayed message");
                continue;
            }
            backlog.last_seen = message.index;
            return Some(message);
        }
        backlog.draining = false;
        None
    }

    async fn drain(self: Arc<Self>) {
        while let Some(message) = self.next_message() {
            if self.synchronous {
                deliver(&self.callback, self.id, message).await;
            } else {
                let callback = Arc::clone(&self.callback);
                let id = self.id;
                tokio::spawn(async move { deliver(&callback, id, message).await });
            }
        }
    }
}

async fn deliver<P: Clone>(callback: &ConsumerCallback<P>, id: ConsumerId, message: Message<P>) {
    let retry = message.clone();
    if let Err(error) = callback(message).await {
        warn!(
            consumer = %id,
            topic = %retry.topic,
            index = retry.index,
            %error,
            "consumer callback failed"
        );
        let report = Message {
            error: Some(Error::ConsumerFunction(error.to_string())),
            ..retry
        };
        if let Err(error) = callback(report).await {
            debug!(consumer = %id, %error, "consumer failed handling its own error");
        }
    }
}

struct Topic<P> {
    next_index: u64,
    history: VecDeque<Message<P>>,
    consumers: Vec<Arc<Consumer<P>>>,
}

impl<P> Default for Topic<P> {
    fn default() -> Self {
        Self {
            next_index: 1,
            history: VecDeque::new(),
            consumers: Vec::new(),
        }
    }
}

struct State<P> {
    closed: bool,
    next_consumer: u64,
    topics: FxHashMap<String, Topic<P>>,
}

/// Named topics with ordered per-consumer delivery
///
/// Cloning is cheap and every clone refers to the same topics.
pub struct TopicStream<P> {
    max_history: usize,
    max_backlog: usize,
    state: Arc<Mutex<State<P>>>,
}

impl<P> Clone for TopicStream<P> {
    fn clone(&self) -> Self {
        Self {
            max_history: self.max_history,
            max_backlog: self.max_backlog,
            state: Arc::clone(&self.state),
        }
    }
}

impl<P> fmt::Debug for TopicStream<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TopicStream")
            .field("topics", &state.topics.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<P: Clone + Send + Sync + 'static> TopicStream<P> {
    /// Create a stream retaining `max_history` messages per topic, with
    /// consumer backlogs bounded by `max_backlog` (0 = unbounded)
    pub fn new(max_history: usize, max_backlog: usize) -> Self {
        Self {
            max_history,
            max_backlog,
            state: Arc::new(Mutex::new(State {
                closed: false,
                next_consumer: 0,
                topics: FxHashMap::default(),
            })),
        }
    }

    /// Create a stream with the limits from `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_messages_per_topic(), config.max_consumer_backlog())
    }

    /// Subscribe `callback` to `topic`
    ///
    /// A synchronous consumer awaits each callback before the next message.
    pub fn subscribe<F, Fut>(
        &self,
        topic: impl Into<String>,
        synchronous: bool,
        callback: F,
    ) -> ConsumerId
    where
        F: Fn(Message<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let callback: ConsumerCallback<P> =
            Arc::new(move |message: Message<P>| -> BoxFuture<'static, Result<()>> {
                Box::pin(callback(message))
            });
        self.subscribe_boxed(topic, synchronous, callback)
    }

    /// Subscribe an already boxed callback
    pub fn subscribe_boxed(
        &self,
        topic: impl Into<String>,
        synchronous: bool,
        callback: ConsumerCallback<P>,
    ) -> ConsumerId {
        let topic = topic.into();
        let mut state = self.state.lock();
        let id = ConsumerId(state.next_consumer);
        state.next_consumer += 1;
        let consumer = Arc::new(Consumer {
            id,
            topic: topic.clone(),
            callback,
            synchronous,
            max_backlog: self.max_backlog,
            backlog: Mutex::new(Backlog {
                queue: VecDeque::new(),
                last_seen: 0,
                draining: false,
                closed: state.closed,
            }),
        });
        debug!(consumer = %id, topic = %topic, synchronous, "consumer subscribed");
        state.topics.entry(topic).or_default().consumers.push(consumer);
        id
    }

    /// Publish `payload` on `topic`
    ///
    /// Returns the assigned index, or `None` once the stream is closed.
    /// Consumers are handed the message before the topic lock is released,
    /// so concurrent producers reach every backlog in index order.
    pub fn produce(
        &self,
        topic: impl Into<String>,
        payload: P,
        error: Option<Error>,
    ) -> Option<u64> {
        let topic = topic.into();
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let entry = state.topics.entry(topic.clone()).or_default();
        let message = Message {
            topic,
            index: entry.next_index,
            payload,
            error,
        };
        entry.next_index += 1;
        if self.max_history > 0 {
            if entry.history.len() >= self.max_history {
                entry.history.pop_front();
            }
            entry.history.push_back(message.clone());
        }
        let index = message.index;
        for consumer in &entry.consumers {
            consumer.publish(message.clone());
        }
        Some(index)
    }

    /// Remove a consumer; returns whether it existed
    pub fn unsubscribe(&self, id: ConsumerId) -> bool {
        let mut state = self.state.lock();
        for topic in state.topics.values_mut() {
            if let Some(position) = topic.consumers.iter().position(|c| c.id == id) {
                let consumer = topic.consumers.remove(position);
                consumer.close();
                return true;
            }
        }
        false
    }

    /// Retained messages of `topic`, oldest first
    pub fn message_history(&self, topic: &str) -> Vec<Message<P>> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of consumers on `topic`
    pub fn consumer_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .topics
            .get(topic)
            .map_or(0, |t| t.consumers.len())
    }

    /// Whether [`Self::close`] was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Drop every topic and consumer; later `produce` calls do nothing
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for (_, topic) in state.topics.drain() {
            for consumer in topic.consumers {
                consumer.close();
            }
        }
    }
}
