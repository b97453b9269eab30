//! WebSocket duplex channel over `tokio-tungstenite`.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::{ChannelFuture, ChannelSink, ChannelSource, Connector, Delivery, DuplexChannel, Received};
use crate::{AppError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket channels (`ws://` or `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, url: &'a str) -> ChannelFuture<'a, Result<DuplexChannel>> {
        Box::pin(async move {
            let (ws, _response) = connect_async(url)
                .await
                .map_err(|err| AppError::Relay(format!("failed to connect to {url}: {err}")))?;
            info!(url, "relay channel connected");

            let (sink, stream) = ws.split();
            Ok(DuplexChannel {
                source: Box::new(WebSocketSource { stream }),
                sink: Arc::new(WebSocketSink {
                    sink: Mutex::new(sink),
                }),
            })
        })
    }
}

struct WebSocketSource {
    stream: SplitStream<WsStream>,
}

impl ChannelSource for WebSocketSource {
    fn recv(&mut self) -> ChannelFuture<'_, Received> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    None | Some(Ok(Message::Close(_))) => return Received::Closed,
                    Some(Err(err)) => {
                        debug!(%err, "relay channel read failed");
                        return Received::Closed;
                    }
                    Some(Ok(Message::Text(text))) => {
                        return Received::Message(text.as_str().as_bytes().to_vec());
                    }
                    Some(Ok(Message::Binary(data))) => return Received::Message(data.to_vec()),
                    // Ping, pong, and raw frames carry no payload for the child.
                    Some(Ok(_)) => {}
                }
            }
        })
    }
}

/// Writing half of the socket. A send holds the lock until the frame is
/// flushed; the relay cancels its sender before calling `close`.
struct WebSocketSink {
    sink: Mutex<SplitSink<WsStream, Message>>,
}

impl ChannelSink for WebSocketSink {
    fn send(&self, text: String) -> ChannelFuture<'_, Delivery> {
        Box::pin(async move {
            let mut sink = self.sink.lock().await;
            match sink.send(Message::Text(text.into())).await {
                Ok(()) => Delivery::Sent,
                Err(err) => {
                    debug!(%err, "relay channel send failed");
                    Delivery::Closed
                }
            }
        })
    }

    fn close(&self) -> ChannelFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut sink = self.sink.lock().await;
            match sink.close().await {
                Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
                Err(err) => Err(AppError::from(err)),
            }
        })
    }
}
