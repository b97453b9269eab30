//! Dispatcher API abstraction.
//!
//! The [`Dispatcher`] trait decouples the job state machine and liveness
//! reporter from the HTTP transport so both can be driven against an
//! in-process dispatcher in tests.

pub mod client;

use std::future::Future;
use std::pin::Pin;

use crate::models::job::{DeviceStatus, ExperimentPayload, FinishReport, Job, RemoteJobState};
use crate::Result;

/// Boxed future returned by [`Dispatcher`] operations.
pub type DispatchFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Operations the agent invokes on the dispatch service.
pub trait Dispatcher: Send + Sync {
    /// Fetch the ordered list of pending jobs for this device.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Dispatch`](crate::AppError::Dispatch) on transport
    /// or decoding failure and [`AppError::Protocol`](crate::AppError::Protocol)
    /// on an unexpected status.
    fn fetch_queue(&self) -> DispatchFuture<'_, Vec<Job>>;

    /// Fetch the experiment payload a job runs.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::fetch_queue`].
    fn fetch_experiment<'a>(&'a self, experiment_id: &'a str)
        -> DispatchFuture<'a, ExperimentPayload>;

    /// Fetch the authoritative state of a job.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::fetch_queue`].
    fn fetch_job_state<'a>(&'a self, job_id: &'a str) -> DispatchFuture<'a, RemoteJobState>;

    /// Mark a job as started.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::fetch_queue`].
    fn notify_start<'a>(&'a self, job_id: &'a str) -> DispatchFuture<'a, ()>;

    /// Submit the results of a finished job.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::fetch_queue`].
    fn post_results<'a>(&'a self, job_id: &'a str, report: &'a FinishReport)
        -> DispatchFuture<'a, ()>;

    /// Report liveness together with the current occupancy.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::fetch_queue`].
    fn heartbeat(&self, status: DeviceStatus) -> DispatchFuture<'_, ()>;
}
