//! HTTP/JSON dispatcher client.
//!
//! All paths are prefixed with the dispatch host from [`AgentIdentity`].
//! Reads accept `200` only; `PUT` operations accept `200` or `204`.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{DispatchFuture, Dispatcher};
use crate::models::identity::AgentIdentity;
use crate::models::job::{
    DeviceStatus, ExperimentPayload, FinishReport, HeartbeatReport, Job, RemoteJobState,
};
use crate::{AppError, Result};

const READ_ACCEPTED: &[StatusCode] = &[StatusCode::OK];
const WRITE_ACCEPTED: &[StatusCode] = &[StatusCode::OK, StatusCode::NO_CONTENT];

/// Dispatcher client speaking the `/dispatch` HTTP API.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    identity: AgentIdentity,
}

impl HttpDispatcher {
    /// Build a client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be constructed.
    pub fn new(identity: AgentIdentity, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { client, identity })
    }

    /// Identity this client reports for.
    #[must_use]
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Queue endpoint for this device.
    #[must_use]
    pub fn queue_url(&self) -> String {
        format!(
            "{}/dispatch/devices/{}/queue",
            self.identity.dispatch_host(),
            self.identity.device_id()
        )
    }

    /// Heartbeat endpoint for this device.
    #[must_use]
    pub fn heartbeat_url(&self) -> String {
        format!(
            "{}/dispatch/devices/{}/heartbeat",
            self.identity.dispatch_host(),
            self.identity.device_id()
        )
    }

    fn experiment_url(&self, experiment_id: &str) -> String {
        format!(
            "{}/dispatch/experiments/{experiment_id}",
            self.identity.dispatch_host()
        )
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/dispatch/jobs/{job_id}", self.identity.dispatch_host())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String, what: &str) -> Result<T> {
        debug!(%url, "dispatcher GET");
        let response = self.client.get(&url).send().await?;
        let response = ensure_status(response, READ_ACCEPTED, what)?;
        response
            .json::<T>()
            .await
            .map_err(|err| AppError::Dispatch(format!("{what}: invalid response body: {err}")))
    }

    async fn put_json<B: serde::Serialize + Sync>(
        &self,
        url: String,
        body: &B,
        what: &str,
    ) -> Result<()> {
        debug!(%url, "dispatcher PUT");
        let response = self.client.put(&url).json(body).send().await?;
        ensure_status(response, WRITE_ACCEPTED, what)?;
        Ok(())
    }
}

/// Reject any status outside `accepted` as a protocol violation.
fn ensure_status(response: Response, accepted: &[StatusCode], what: &str) -> Result<Response> {
    let status = response.status();
    if accepted.contains(&status) {
        Ok(response)
    } else {
        Err(AppError::Protocol(format!(
            "{what} rejected with status {}",
            status.as_u16()
        )))
    }
}

impl Dispatcher for HttpDispatcher {
    fn fetch_queue(&self) -> DispatchFuture<'_, Vec<Job>> {
        Box::pin(self.get_json(self.queue_url(), "queue poll"))
    }

    fn fetch_experiment<'a>(
        &'a self,
        experiment_id: &'a str,
    ) -> DispatchFuture<'a, ExperimentPayload> {
        Box::pin(self.get_json(self.experiment_url(experiment_id), "experiment fetch"))
    }

    fn fetch_job_state<'a>(&'a self, job_id: &'a str) -> DispatchFuture<'a, RemoteJobState> {
        Box::pin(self.get_json(self.job_url(job_id), "job state query"))
    }

    fn notify_start<'a>(&'a self, job_id: &'a str) -> DispatchFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/start", self.job_url(job_id));
            self.put_json(url, &serde_json::json!({}), "job start").await
        })
    }

    fn post_results<'a>(
        &'a self,
        job_id: &'a str,
        report: &'a FinishReport,
    ) -> DispatchFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/finish", self.job_url(job_id));
            self.put_json(url, report, "job finish").await
        })
    }

    fn heartbeat(&self, status: DeviceStatus) -> DispatchFuture<'_, ()> {
        Box::pin(async move {
            let report = HeartbeatReport::from(status);
            self.put_json(self.heartbeat_url(), &report, "heartbeat").await
        })
    }
}
