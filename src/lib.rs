#![forbid(unsafe_code)]

//! Worker agent that executes dispatched jobs as child processes.
//!
//! The agent polls a dispatch service for jobs, runs each job's code as a
//! child process, relays the child's stdin/stdout over a duplex channel, and
//! reports liveness for its entire lifetime.

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod relay;

pub use config::AgentConfig;
pub use errors::{AppError, Result};
