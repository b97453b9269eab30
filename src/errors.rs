//! Error types shared across the agent.

use std::fmt::{Display, Formatter};

/// Shared agent result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Agent error enumeration covering all fatal and reportable failure modes.
///
/// Expected end-of-life conditions on the relay (closed channel, broken
/// pipe, end of stream) are not errors and never surface as `AppError`.
#[derive(Debug)]
pub enum AppError {
    /// Configuration or command-line validation failure.
    Config(String),
    /// Dispatcher unreachable or returned an unreadable body.
    Dispatch(String),
    /// Dispatcher answered with a status code outside the accepted set.
    Protocol(String),
    /// Duplex channel could not be opened.
    Relay(String),
    /// Child process could not be spawned or signalled.
    Process(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Dispatch(msg) => write!(f, "dispatch: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Relay(msg) => write!(f, "relay: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Dispatch(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Relay(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
