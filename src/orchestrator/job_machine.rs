//! Job lifecycle state machine.
//!
//! Drives one job at a time through `Polling → Running →
//! (TerminationRequested →) Polling`. The active job (its child process and
//! relay) lives inside the `Running` and `TerminationRequested` variants, so
//! no handle can outlive its job and a second job cannot start while one is
//! in flight.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::AgentConfig;
use crate::dispatch::Dispatcher;
use crate::models::job::{DeviceStatus, Job};
use crate::orchestrator::supervisor::{
    escalate, ChildControl, Escalation, ProcessSupervisor, SpawnedProcess, WaitOutcome,
};
use crate::relay::{Connector, Relay, RelaySettings};
use crate::Result;

/// A job that has been started: its child process and relay.
pub struct ActiveJob {
    job: Job,
    title: String,
    process: ProcessSupervisor,
    relay: Relay,
}

impl ActiveJob {
    /// The job being executed.
    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Title of the experiment being executed.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// OS process id of the child.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }
}

/// Lifecycle state of the agent.
pub enum JobState {
    /// Waiting for work.
    Polling,
    /// A job's child process is running.
    Running(ActiveJob),
    /// The dispatcher (or agent shutdown) asked the running job to stop.
    TerminationRequested(ActiveJob),
    /// The loop has ended.
    Exit,
}

impl JobState {
    /// State name used in log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Running(_) => "running",
            Self::TerminationRequested(_) => "termination_requested",
            Self::Exit => "exit",
        }
    }

    /// The in-flight job, if any.
    #[must_use]
    pub fn active(&self) -> Option<&ActiveJob> {
        match self {
            Self::Running(active) | Self::TerminationRequested(active) => Some(active),
            Self::Polling | Self::Exit => None,
        }
    }
}

/// Orchestrates polling, job start, supervision, and finalization.
pub struct JobMachine {
    config: AgentConfig,
    dispatcher: Arc<dyn Dispatcher>,
    connector: Arc<dyn Connector>,
    status: watch::Sender<DeviceStatus>,
    shutdown: CancellationToken,
}

impl JobMachine {
    /// Build a state machine. Cancelling `shutdown` lets an in-flight job be
    /// stopped and reported, then ends [`JobMachine::run`].
    #[must_use]
    pub fn new(
        config: AgentConfig,
        dispatcher: Arc<dyn Dispatcher>,
        connector: Arc<dyn Connector>,
        shutdown: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(DeviceStatus::Idle);
        Self {
            config,
            dispatcher,
            connector,
            status,
            shutdown,
        }
    }

    /// Subscribe to occupancy updates for the liveness reporter.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<DeviceStatus> {
        self.status.subscribe()
    }

    /// Run the loop from `Polling` until it reaches `Exit`.
    ///
    /// # Errors
    ///
    /// Returns the first fatal dispatcher, relay, or spawn error. Any child
    /// still running is killed when its handle is dropped.
    pub async fn run(&self) -> Result<()> {
        info!("awaiting work");
        let mut state = JobState::Polling;

        loop {
            let from = state.name();
            state = self.step(state).await.map_err(|err| {
                error!(%err, state = from, "fatal error in job loop");
                err
            })?;

            if state.name() != from {
                debug!(from, to = state.name(), "job state transition");
            }
            if matches!(state, JobState::Exit) {
                info!("job loop exited");
                return Ok(());
            }
        }
    }

    /// Advance the machine by one transition.
    ///
    /// # Errors
    ///
    /// Returns fatal errors from polling, job start, or the job state query.
    pub async fn step(&self, state: JobState) -> Result<JobState> {
        match state {
            JobState::Polling => self.poll().await,
            JobState::Running(active) => self.supervise(active).await,
            JobState::TerminationRequested(active) => Ok(self.stop(active).await),
            JobState::Exit => Ok(JobState::Exit),
        }
    }

    async fn poll(&self) -> Result<JobState> {
        if self.shutdown.is_cancelled() {
            return Ok(JobState::Exit);
        }

        let jobs = self.dispatcher.fetch_queue().await?;
        let Some(job) = jobs.into_iter().next() else {
            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(JobState::Exit),
                () = tokio::time::sleep(self.config.poll_interval()) => {}
            }
            return Ok(JobState::Polling);
        };

        let span = info_span!("job", job_id = %job.job_id);
        let active = self.start(job).instrument(span).await?;
        Ok(JobState::Running(active))
    }

    async fn start(&self, job: Job) -> Result<ActiveJob> {
        info!(experiment_id = %job.experiment_id, "found job, fetching experiment");
        let experiment = self.dispatcher.fetch_experiment(&job.experiment_id).await?;

        info!(title = %experiment.title, "starting experiment");
        let channel = self.connector.connect(&self.config.relay_url).await?;
        let SpawnedProcess {
            supervisor,
            stdin,
            stdout,
        } = ProcessSupervisor::spawn(&self.config.runner, &experiment).await?;
        let relay = Relay::start(channel, stdin, stdout, self.relay_settings());

        if let Err(err) = self.dispatcher.notify_start(&job.job_id).await {
            // Kill the child first so the relay drains at once.
            drop(supervisor);
            let _ = relay.finish().await;
            return Err(err);
        }
        self.status.send_replace(DeviceStatus::Busy);

        Ok(ActiveJob {
            job,
            title: experiment.title,
            process: supervisor,
            relay,
        })
    }

    async fn supervise(&self, mut active: ActiveJob) -> Result<JobState> {
        match active.process.wait_for(self.config.wait_poll()).await {
            Ok(WaitOutcome::Exited { code }) => {
                info!(job_id = %active.job.job_id, exit_code = ?code, "experiment process exited");
                return Ok(self.finalize(active).await);
            }
            Ok(WaitOutcome::TimedOut) => {}
            Err(err) => {
                warn!(job_id = %active.job.job_id, %err, "failed to poll experiment process");
            }
        }

        if self.shutdown.is_cancelled() {
            info!(job_id = %active.job.job_id, "agent shutting down; stopping job");
            return Ok(JobState::TerminationRequested(active));
        }

        let remote = self.dispatcher.fetch_job_state(&active.job.job_id).await?;
        if remote.is_termination_requested() {
            info!(job_id = %active.job.job_id, "dispatcher requested termination");
            return Ok(JobState::TerminationRequested(active));
        }

        Ok(JobState::Running(active))
    }

    async fn stop(&self, mut active: ActiveJob) -> JobState {
        let outcome = escalate(
            &mut active.process,
            self.config.terminate_grace(),
            self.config.kill_grace(),
        )
        .await;

        match outcome {
            Escalation::Terminated { code } | Escalation::Killed { code } => {
                info!(job_id = %active.job.job_id, exit_code = ?code, ?outcome, "experiment stopped");
            }
            Escalation::Stuck => {
                warn!(
                    job_id = %active.job.job_id,
                    pid = active.pid().unwrap_or(0),
                    "experiment failed to stop; process may be orphaned"
                );
            }
        }

        self.finalize(active).await
    }

    /// Close the relay, post results, and release the child. Never fails:
    /// finalization faults are logged and the machine returns to polling.
    async fn finalize(&self, active: ActiveJob) -> JobState {
        let ActiveJob {
            job,
            title,
            process,
            relay,
        } = active;

        let report = relay.finish().await.take_report();

        if let Err(err) = self.dispatcher.post_results(&job.job_id, &report).await {
            warn!(job_id = %job.job_id, %err, "failed to post job results");
        }

        drop(process);
        self.status.send_replace(DeviceStatus::Idle);
        info!(
            job_id = %job.job_id,
            %title,
            output_bytes = report.out.len(),
            "job finished, awaiting work"
        );
        JobState::Polling
    }

    fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            chunk_size: self.config.read_chunk_bytes,
            drain: self.config.relay_drain(),
            join_timeout: self.config.relay_join_timeout(),
        }
    }
}
