//! Duplex stream relay between a child process and a remote channel.
//!
//! A [`Relay`] owns two pump tasks for the lifetime of one job:
//! - the inbound pump writes channel messages to the child's stdin;
//! - the outbound pump forwards stdout chunks to the channel and captures them.
//!
//! End-of-stream on either side is reported as an explicit [`Received::Closed`]
//! or [`Delivery::Closed`] value and ends the affected pump quietly. Closing
//! the relay cancels both pumps, joins them with a bound, then closes the
//! channel.

pub mod pump;
pub mod websocket;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::models::output::CapturedOutput;
use crate::Result;

/// Boxed future returned by channel operations.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of receiving from the remote channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// One complete message, as raw bytes.
    Message(Vec<u8>),
    /// The channel is closed; no further messages will arrive.
    Closed,
}

/// Outcome of sending to the remote channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message was handed to the transport.
    Sent,
    /// The channel is closed; the message was dropped.
    Closed,
}

/// Receiving half of a duplex channel.
pub trait ChannelSource: Send {
    /// Wait for the next message or closure.
    fn recv(&mut self) -> ChannelFuture<'_, Received>;
}

/// Sending half of a duplex channel, shared between the outbound pump and
/// the relay owner that closes it.
pub trait ChannelSink: Send + Sync {
    /// Send one text message.
    fn send(&self, text: String) -> ChannelFuture<'_, Delivery>;

    /// Close the channel. Closing an already-closed channel succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Relay`](crate::AppError::Relay) if the close
    /// handshake could not be sent.
    fn close(&self) -> ChannelFuture<'_, Result<()>>;
}

/// Both halves of a connected channel.
pub struct DuplexChannel {
    /// Receiving half, moved into the inbound pump.
    pub source: Box<dyn ChannelSource>,
    /// Sending half, shared with the outbound pump.
    pub sink: Arc<dyn ChannelSink>,
}

/// Opens duplex channels to the remote observer.
pub trait Connector: Send + Sync {
    /// Connect to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Relay`](crate::AppError::Relay) if the endpoint
    /// cannot be reached.
    fn connect<'a>(&'a self, url: &'a str) -> ChannelFuture<'a, Result<DuplexChannel>>;
}

/// Timing and sizing for one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Maximum bytes per stdout read.
    pub chunk_size: usize,
    /// Time the outbound pump gets to reach end-of-stream before closing.
    pub drain: Duration,
    /// Bound on closing the channel and on joining each pump.
    pub join_timeout: Duration,
}

/// Running pair of pumps for one job.
///
/// Dropping a relay without [`Relay::finish`] still cancels both pumps.
pub struct Relay {
    sink: Arc<dyn ChannelSink>,
    closed: DropGuard,
    inbound: JoinHandle<usize>,
    outbound: JoinHandle<CapturedOutput>,
    settings: RelaySettings,
}

impl Relay {
    /// Start both pumps over `channel` and the child's stdio.
    #[must_use]
    pub fn start<W, R>(channel: DuplexChannel, stdin: W, stdout: R, settings: RelaySettings) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let closed = CancellationToken::new();
        let DuplexChannel { source, sink } = channel;

        let inbound = tokio::spawn(pump::inbound_pump(source, stdin, closed.clone()));
        let outbound = tokio::spawn(pump::outbound_pump(
            stdout,
            Arc::clone(&sink),
            settings.chunk_size,
            closed.clone(),
        ));

        Self {
            sink,
            closed: closed.drop_guard(),
            inbound,
            outbound,
            settings,
        }
    }

    /// Stop both pumps, close the channel, and return the captured output.
    ///
    /// The outbound pump gets the drain window to reach end-of-stream. The
    /// pumps are then cancelled, which also releases a send stalled on the
    /// channel, so the capture survives a wedged remote. The channel is
    /// closed only after the outbound pump has let go of it.
    ///
    /// Never fails: pumps that do not stop within the join bound are
    /// aborted, and their output is reported as empty.
    pub async fn finish(self) -> CapturedOutput {
        let Self {
            sink,
            closed,
            inbound,
            mut outbound,
            settings,
        } = self;
        let closed = closed.disarm();

        let mut drained = None;
        if !settings.drain.is_zero() {
            if let Ok(joined) = timeout(settings.drain, &mut outbound).await {
                drained = Some(joined);
            }
        }
        closed.cancel();

        let captured = match drained {
            Some(Ok(output)) => Some(output),
            Some(Err(err)) => {
                warn!(%err, "outbound pump panicked");
                None
            }
            None => join_bounded(outbound, settings.join_timeout, "outbound").await,
        };

        match timeout(settings.join_timeout, sink.close()).await {
            Ok(Ok(())) => debug!("relay channel closed"),
            Ok(Err(err)) => debug!(%err, "relay channel close failed"),
            Err(_elapsed) => debug!("relay channel close timed out"),
        }
        let forwarded = join_bounded(inbound, settings.join_timeout, "inbound").await;

        let captured = captured.unwrap_or_default();
        debug!(
            captured_bytes = captured.len(),
            inbound_messages = forwarded.unwrap_or(0),
            "relay stopped"
        );
        captured
    }
}

async fn join_bounded<T>(
    mut handle: JoinHandle<T>,
    limit: Duration,
    pump: &'static str,
) -> Option<T> {
    match timeout(limit, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            warn!(pump, %err, "relay pump panicked");
            None
        }
        Err(_elapsed) => {
            handle.abort();
            warn!(pump, "relay pump did not stop in time; aborted");
            None
        }
    }
}
