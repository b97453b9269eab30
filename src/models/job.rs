//! Job, experiment, and status models exchanged with the dispatcher.

use serde::{Deserialize, Serialize};

use super::deserialize_flexible_id;

/// One unit of assigned work taken from the device queue.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Job {
    /// Dispatcher job identifier.
    #[serde(rename = "id", deserialize_with = "deserialize_flexible_id")]
    pub job_id: String,
    /// Experiment whose code this job runs.
    #[serde(rename = "experiment", deserialize_with = "deserialize_flexible_id")]
    pub experiment_id: String,
}

/// Experiment code fetched once per job.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExperimentPayload {
    /// Human-readable experiment title.
    pub title: String,
    /// Source code of the runnable unit.
    #[serde(alias = "code_string")]
    pub code: String,
}

/// Job state as reported by the dispatcher.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct RemoteJobState {
    /// Numeric state code.
    pub state: i64,
}

impl RemoteJobState {
    /// State code the dispatcher uses to ask for a running job to stop.
    pub const TERMINATION_REQUESTED: i64 = 2;

    /// Whether the dispatcher wants the job stopped.
    #[must_use]
    pub fn is_termination_requested(self) -> bool {
        self.state == Self::TERMINATION_REQUESTED
    }
}

/// Agent occupancy reported with every heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Polling for work.
    #[default]
    Idle,
    /// A job is in flight.
    Busy,
}

impl DeviceStatus {
    /// Wire code for the heartbeat body.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Busy => 1,
        }
    }

    /// Label used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
        }
    }
}

/// Heartbeat request body.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// `0` when idle, `1` when busy.
    pub state: u8,
}

impl From<DeviceStatus> for HeartbeatReport {
    fn from(status: DeviceStatus) -> Self {
        Self {
            state: status.code(),
        }
    }
}

/// Results submitted when a job finishes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FinishReport {
    /// Captured standard output, decoded lossily.
    pub out: String,
    /// Captured standard error; always empty because stderr is not captured.
    pub error: String,
}
