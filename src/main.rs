#![forbid(unsafe_code)]

//! Entry point for the `dispatch-agent` worker binary.
//!
//! Loads configuration, starts the liveness reporter, and runs the job state
//! machine until a shutdown signal or a fatal dispatcher error.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use dispatch_agent::config::AgentConfig;
use dispatch_agent::dispatch::client::HttpDispatcher;
use dispatch_agent::dispatch::Dispatcher;
use dispatch_agent::models::identity::AgentIdentity;
use dispatch_agent::orchestrator::heartbeat::spawn_heartbeat;
use dispatch_agent::orchestrator::job_machine::JobMachine;
use dispatch_agent::relay::websocket::WebSocketConnector;
use dispatch_agent::{AppError, Result};

/// Environment variable selecting the log output format.
const LOG_FORMAT_ENV: &str = "DISPATCH_AGENT_LOG_FORMAT";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "dispatch-agent", about = "Dispatch worker agent", version, long_about = None)]
struct Cli {
    /// Device identifier assigned by the dispatcher.
    device_id: u64,

    /// Base URL of the dispatch service (e.g. `http://dispatch.local:8000`).
    dispatch_host: String,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing() {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "agent stopped");
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = AgentConfig::load()?;
    let identity = AgentIdentity::new(args.device_id, &args.dispatch_host)?;
    info!(
        device_id = identity.device_id(),
        dispatch_host = identity.dispatch_host(),
        relay_url = %config.relay_url,
        "dispatch agent starting"
    );

    let dispatcher: Arc<dyn Dispatcher> =
        Arc::new(HttpDispatcher::new(identity, config.http_timeout())?);

    // ── Build the state machine ─────────────────────────
    let shutdown = CancellationToken::new();
    let machine = JobMachine::new(
        config.clone(),
        Arc::clone(&dispatcher),
        Arc::new(WebSocketConnector),
        shutdown.clone(),
    );

    // ── Start liveness reporter ─────────────────────────
    let heartbeat_cancel = CancellationToken::new();
    let mut heartbeat = spawn_heartbeat(
        dispatcher,
        config.heartbeat_interval(),
        machine.status(),
        heartbeat_cancel.clone(),
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    // ── Run until exit or a rejected heartbeat ──────────
    let outcome = tokio::select! {
        result = machine.run() => result,
        joined = &mut heartbeat => {
            // The reporter only stops on its own after a rejected report.
            return flatten_heartbeat(joined);
        }
    };

    heartbeat_cancel.cancel();
    let stopped = heartbeat.await;
    outcome?;
    flatten_heartbeat(stopped)?;
    info!("dispatch agent shut down");
    Ok(())
}

fn flatten_heartbeat(
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    joined.map_err(|err| AppError::Dispatch(format!("heartbeat task failed: {err}")))?
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing() -> Result<()> {
    let log_format = match std::env::var(LOG_FORMAT_ENV) {
        Ok(raw) => LogFormat::from_str(&raw, true)
            .map_err(|err| AppError::Config(format!("invalid {LOG_FORMAT_ENV}: {err}")))?,
        Err(_) => LogFormat::Text,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
