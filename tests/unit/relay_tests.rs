//! Unit tests for relay startup and teardown.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use dispatch_agent::relay::{Relay, RelaySettings};

use super::channel_fakes::{memory_channel, stalled_channel};

fn settings() -> RelaySettings {
    RelaySettings {
        chunk_size: 512,
        drain: Duration::from_millis(100),
        join_timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn finish_returns_all_output_and_closes_channel() {
    let (channel, remote, sink) = memory_channel();
    let (stdin, mut child_stdin) = tokio::io::duplex(1024);
    let (mut child_stdout, stdout) = tokio::io::duplex(1024);

    let relay = Relay::start(channel, stdin, stdout, settings());

    remote.send(b"ping\n".to_vec()).unwrap();
    let mut line = [0_u8; 5];
    child_stdin.read_exact(&mut line).await.unwrap();
    assert_eq!(&line, b"ping\n");

    child_stdout.write_all(b"pong\n").await.unwrap();
    drop(child_stdout);

    let captured = relay.finish().await;
    assert_eq!(captured.as_bytes(), b"pong\n");
    assert_eq!(sink.joined(), "pong\n");
    assert!(sink.is_closed());
}

#[tokio::test]
async fn finish_is_bounded_when_child_keeps_stdout_open() {
    let (channel, _remote, sink) = memory_channel();
    let (stdin, _child_stdin) = tokio::io::duplex(64);
    let (mut child_stdout, stdout) = tokio::io::duplex(64);

    let relay = Relay::start(channel, stdin, stdout, settings());
    child_stdout.write_all(b"partial").await.unwrap();

    let started = Instant::now();
    let captured = relay.finish().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(captured.as_bytes(), b"partial");
    assert!(sink.is_closed());
}

#[tokio::test]
async fn dropping_relay_stops_pumps() {
    let (channel, _remote, _sink) = memory_channel();
    let (stdin, mut child_stdin) = tokio::io::duplex(64);
    let (_child_stdout, stdout) = tokio::io::duplex(64);

    let relay = Relay::start(channel, stdin, stdout, settings());
    drop(relay);

    // The inbound pump drops the stdin writer when it stops.
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), child_stdin.read_to_end(&mut rest))
        .await
        .expect("inbound pump stopped")
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn remote_close_leaves_output_capture_running() {
    let (channel, remote, sink) = memory_channel();
    let (stdin, _child_stdin) = tokio::io::duplex(64);
    let (mut child_stdout, stdout) = tokio::io::duplex(64);

    let relay = Relay::start(channel, stdin, stdout, settings());
    drop(remote);

    child_stdout.write_all(b"still captured").await.unwrap();
    drop(child_stdout);

    let captured = relay.finish().await;
    assert_eq!(captured.as_bytes(), b"still captured");
    assert_eq!(sink.joined(), "still captured");
}

#[tokio::test]
async fn stalled_channel_send_keeps_captured_output() {
    let (channel, _remote, sink) = stalled_channel();
    let (stdin, _child_stdin) = tokio::io::duplex(64);
    let (mut child_stdout, stdout) = tokio::io::duplex(64);
    let settings = RelaySettings {
        chunk_size: 512,
        drain: Duration::from_millis(100),
        join_timeout: Duration::from_millis(300),
    };

    let relay = Relay::start(channel, stdin, stdout, settings);
    child_stdout.write_all(b"result line\n").await.unwrap();
    drop(child_stdout);

    let started = Instant::now();
    let captured = relay.finish().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(captured.as_bytes(), b"result line\n");
    assert!(sink.is_closed());
}
