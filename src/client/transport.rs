//! Socket abstraction under [`super::ConnectionClient`].
//!
//! A [`Connector`] opens a connection and splits it into a write half
//! ([`MessageSink`]) and a read half ([`MessageSource`]). The production
//! implementation, [`TungsteniteConnector`], uses `tokio-tungstenite`; tests
//! plug in an in-memory pair instead.

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::trace;

use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frame received from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
    /// Pong, or any other frame proving the peer is alive
    Pong,
    /// Close frame with its code, if any
    Close(Option<u16>),
}

/// Write half of a connection
pub trait MessageSink: Send + 'static {
    /// Write a text frame
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<()>>;

    /// Write a ping frame
    fn ping(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Start the closing handshake
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Read half of a connection
pub trait MessageSource: Send + 'static {
    /// Next frame; `None` once the stream has ended
    fn next(&mut self) -> BoxFuture<'_, Option<Result<Incoming>>>;
}

/// Both halves of an open connection
pub type Connection = (Box<dyn MessageSink>, Box<dyn MessageSource>);

/// Opens connections to an endpoint
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake with `url`
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection>>;
}

/// `tokio-tungstenite` connector (TLS through rustls with webpki roots)
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection>> {
        let url = url.to_owned();
        Box::pin(async move {
            url::Url::parse(&url)?;
            let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (write, read) = stream.split();
            Ok((
                Box::new(TungsteniteSink { write }) as Box<dyn MessageSink>,
                Box::new(TungsteniteSource { read }) as Box<dyn MessageSource>,
            ))
        })
    }
}

struct TungsteniteSink {
    write: SplitSink<WsStream, Message>,
}

impl MessageSink for TungsteniteSink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write.send(Message::Text(text)).await?;
            Ok(())
        })
    }

    fn ping(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write.send(Message::Ping(Vec::new())).await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            self.write.send(Message::Close(Some(frame))).await?;
            Ok(())
        })
    }
}

struct TungsteniteSource {
    read: SplitStream<WsStream>,
}

impl MessageSource for TungsteniteSource {
    fn next(&mut self) -> BoxFuture<'_, Option<Result<Incoming>>> {
        Box::pin(async move {
            loop {
                let frame = match self.read.next().await? {
                    Ok(frame) => frame,
                    Err(err) => return Some(Err(err.into())),
                };
                let incoming = match frame {
                    Message::Text(text) => Incoming::Text(text),
                    Message::Binary(data) => Incoming::Binary(data),
                    // tungstenite queues the pong reply itself
                    Message::Ping(_) | Message::Pong(_) => Incoming::Pong,
                    Message::Close(frame) => {
                        Incoming::Close(frame.map(|frame| u16::from(frame.code)))
                    }
                    Message::Frame(_) => {
                        trace!("skipping raw frame");
                        continue;
                    }
                };
                return Some(Ok(incoming));
            }
        })
    }
}
