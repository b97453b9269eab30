//! Liveness reporter.
//!
//! Reports the agent's occupancy to the dispatcher on a fixed interval for
//! the whole lifetime of the agent. The first report goes out immediately.
//! A rejected or failed report ends the task with an error, which the entry
//! point treats as fatal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dispatch::Dispatcher;
use crate::models::job::DeviceStatus;
use crate::Result;

/// Spawn the liveness reporter.
///
/// Each tick sends the latest value published on `status`. The task returns
/// `Ok(())` once `cancel` fires, without a final report, and `Err` on the
/// first report the dispatcher does not accept.
#[must_use]
pub fn spawn_heartbeat(
    dispatcher: Arc<dyn Dispatcher>,
    interval: Duration,
    status: watch::Receiver<DeviceStatus>,
    cancel: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("heartbeat task shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let current = *status.borrow();
                    if let Err(err) = dispatcher.heartbeat(current).await {
                        error!(%err, status = current.as_str(), "heartbeat rejected");
                        return Err(err);
                    }
                    debug!(status = current.as_str(), "heartbeat sent");
                }
            }
        }
    })
}
