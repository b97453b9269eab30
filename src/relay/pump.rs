//! Inbound and outbound pump loops.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChannelSink, ChannelSource, Delivery, Received};
use crate::models::output::CapturedOutput;

/// Forward channel messages to the child's stdin until either side closes.
///
/// Each message is written verbatim and flushed. A closed channel, a broken
/// stdin pipe, or cancellation ends the pump; none of them is an error.
/// Returns the number of messages written. Dropping `stdin` on return sends
/// end-of-file to the child.
pub async fn inbound_pump<W>(
    mut source: Box<dyn ChannelSource>,
    mut stdin: W,
    closed: CancellationToken,
) -> usize
where
    W: AsyncWrite + Unpin + Send,
{
    let mut forwarded = 0;

    loop {
        let received = tokio::select! {
            biased;

            () = closed.cancelled() => {
                debug!("inbound pump: relay closed, stopping");
                break;
            }

            received = source.recv() => received,
        };

        match received {
            Received::Closed => {
                debug!("inbound pump: channel closed, stopping");
                break;
            }
            Received::Message(bytes) => {
                if let Err(err) = write_message(&mut stdin, &bytes).await {
                    debug!(%err, "inbound pump: child stdin closed, stopping");
                    break;
                }
                forwarded += 1;
            }
        }
    }

    forwarded
}

async fn write_message<W>(stdin: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stdin.write_all(bytes).await?;
    stdin.flush().await
}

/// Forward the child's stdout to the channel, capturing every chunk read.
///
/// Reads at most `chunk_size` bytes at a time. Each chunk is appended to the
/// capture buffer before its text is sent as one message, so a stalled send
/// never loses captured bytes. Cancellation interrupts both reads and sends.
/// Stops on end-of-stream, read failure, a closed channel, or cancellation,
/// and returns what was captured.
pub async fn outbound_pump<R>(
    mut stdout: R,
    sink: Arc<dyn ChannelSink>,
    chunk_size: usize,
    closed: CancellationToken,
) -> CapturedOutput
where
    R: AsyncRead + Unpin + Send,
{
    let mut captured = CapturedOutput::new();
    let mut decoder = Utf8Decoder::default();
    let mut buf = vec![0_u8; chunk_size.max(1)];

    loop {
        let read = tokio::select! {
            biased;

            () = closed.cancelled() => {
                debug!("outbound pump: relay closed, stopping");
                return captured;
            }

            read = stdout.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                debug!(%err, "outbound pump: stdout read failed, stopping");
                return captured;
            }
        };

        let chunk = &buf[..n];
        captured.append(chunk);

        let text = decoder.decode(chunk);
        if text.is_empty() {
            continue;
        }
        match send_or_cancel(sink.as_ref(), text, &closed).await {
            Some(Delivery::Sent) => {}
            Some(Delivery::Closed) => {
                debug!("outbound pump: channel closed, stopping");
                return captured;
            }
            None => {
                debug!("outbound pump: relay closed during send, stopping");
                return captured;
            }
        }
    }

    let tail = decoder.flush();
    if !tail.is_empty() {
        let _ = send_or_cancel(sink.as_ref(), tail, &closed).await;
    }
    debug!(captured_bytes = captured.len(), "outbound pump: stdout closed");
    captured
}

/// Send one message unless the relay is closed first.
///
/// Returns `None` when cancellation wins; the pending send is dropped.
async fn send_or_cancel(
    sink: &dyn ChannelSink,
    text: String,
    closed: &CancellationToken,
) -> Option<Delivery> {
    tokio::select! {
        biased;

        () = closed.cancelled() => None,
        delivery = sink.send(text) => Some(delivery),
    }
}

/// Incremental UTF-8 decoder for chunked byte streams.
///
/// A multi-byte character split across two chunks is held back until its
/// remaining bytes arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode `chunk`, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        // Incomplete sequence at the end; wait for more bytes.
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Emit any held-back bytes at end-of-stream.
    pub fn flush(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}
