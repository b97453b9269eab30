//! Child process supervision for one job.
//!
//! [`ProcessSupervisor`] materializes the experiment code into a per-job
//! scratch directory, launches it with piped stdin/stdout, and exposes a
//! bounded wait plus graceful and forceful stop signals through the
//! [`ChildControl`] trait. [`escalate`] drives the terminate → kill protocol
//! over any [`ChildControl`].
//!
//! The child's stderr is inherited from the agent, not captured.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::config::RunnerConfig;
use crate::models::job::ExperimentPayload;
use crate::{AppError, Result};

/// Result of a bounded wait on the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The child has exited; `code` is `None` when it died from a signal.
    Exited {
        /// Exit code, if the child exited normally.
        code: Option<i32>,
    },
    /// The child was still running when the bound elapsed.
    TimedOut,
}

/// Control surface over a running child, used by the escalation protocol.
pub trait ChildControl: Send {
    /// Wait up to `limit` for the child to exit.
    ///
    /// Returns immediately if it already has. A timeout is reported as
    /// [`WaitOutcome::TimedOut`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the exit status cannot be collected.
    fn wait_for(&mut self, limit: Duration)
        -> Pin<Box<dyn Future<Output = Result<WaitOutcome>> + Send + '_>>;

    /// Send the graceful-stop signal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the signal cannot be delivered.
    fn terminate(&mut self) -> Result<()>;

    /// Send the forceful-stop signal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the signal cannot be delivered.
    fn kill(&mut self) -> Result<()>;
}

/// A freshly spawned child and its piped stdio ends.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Supervisor owning the child and its scratch directory.
    pub supervisor: ProcessSupervisor,
    /// Write end of the child's stdin.
    pub stdin: ChildStdin,
    /// Read end of the child's stdout.
    pub stdout: ChildStdout,
}

/// Owns one child process and the scratch directory holding its code.
///
/// Dropping the supervisor kills a still-running child and removes the
/// scratch directory.
#[derive(Debug)]
pub struct ProcessSupervisor {
    child: Child,
    pid: Option<u32>,
    exit: Option<WaitOutcome>,
    workspace: TempDir,
}

impl ProcessSupervisor {
    /// Write `payload.code` to a fresh scratch directory and launch it with
    /// the configured interpreter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the scratch directory or script cannot be
    /// created, or `AppError::Process` if the interpreter fails to start.
    pub async fn spawn(runner: &RunnerConfig, payload: &ExperimentPayload) -> Result<SpawnedProcess> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("dispatch-job-");
        let workspace = match &runner.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|err| AppError::Io(format!("failed to create job workspace: {err}")))?;

        let script = workspace.path().join(&runner.script_name);
        tokio::fs::write(&script, payload.code.as_bytes())
            .await
            .map_err(|err| AppError::Io(format!("failed to write experiment code: {err}")))?;

        let mut cmd = Command::new(&runner.interpreter);
        cmd.args(&runner.interpreter_args)
            .arg(&script)
            .current_dir(workspace.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Process(format!("failed to spawn {}: {err}", runner.interpreter))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Process("failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Process("failed to capture child stdout".into()))?;

        let pid = child.id();
        info!(
            pid = pid.unwrap_or(0),
            interpreter = %runner.interpreter,
            workspace = %workspace.path().display(),
            "experiment process spawned"
        );

        Ok(SpawnedProcess {
            supervisor: Self {
                child,
                pid,
                exit: None,
                workspace,
            },
            stdin,
            stdout,
        })
    }

    /// OS process id captured at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Scratch directory holding the materialized code.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Exit code once the child has been observed to exit.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.exit {
            Some(WaitOutcome::Exited { code }) => code,
            _ => None,
        }
    }

    /// Whether the child has been observed to exit.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exit.is_some()
    }

    fn record_exit(&mut self, status: std::process::ExitStatus) -> WaitOutcome {
        let outcome = WaitOutcome::Exited {
            code: status.code(),
        };
        self.exit = Some(outcome);
        outcome
    }
}

impl ChildControl for ProcessSupervisor {
    fn wait_for(
        &mut self,
        limit: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<WaitOutcome>> + Send + '_>> {
        Box::pin(async move {
            if let Some(outcome) = self.exit {
                return Ok(outcome);
            }

            if let Some(status) = self
                .child
                .try_wait()
                .map_err(|err| AppError::Process(format!("failed to poll child: {err}")))?
            {
                return Ok(self.record_exit(status));
            }

            match tokio::time::timeout(limit, self.child.wait()).await {
                Ok(Ok(status)) => Ok(self.record_exit(status)),
                Ok(Err(err)) => Err(AppError::Process(format!("failed to wait for child: {err}"))),
                Err(_elapsed) => Ok(WaitOutcome::TimedOut),
            }
        })
    }

    fn terminate(&mut self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        send_terminate(&mut self.child, self.pid)
    }

    fn kill(&mut self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        self.child
            .start_kill()
            .map_err(|err| AppError::Process(format!("failed to kill child: {err}")))
    }
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: Option<u32>) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = pid.ok_or_else(|| AppError::Process("child has no pid".into()))?;
    let raw = i32::try_from(pid)
        .map_err(|_| AppError::Process(format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|err| AppError::Process(format!("failed to send SIGTERM to {pid}: {err}")))
}

// No graceful signal off unix; fall back to the forceful one.
#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: Option<u32>) -> Result<()> {
    child
        .start_kill()
        .map_err(|err| AppError::Process(format!("failed to terminate child: {err}")))
}

/// How the escalation protocol ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The child exited within the grace period after the graceful stop.
    Terminated {
        /// Exit code, if any.
        code: Option<i32>,
    },
    /// The child exited only after the forceful stop.
    Killed {
        /// Exit code, if any.
        code: Option<i32>,
    },
    /// The child survived both signals; it may be left orphaned.
    Stuck,
}

/// Stop a child: graceful signal, bounded wait, forceful signal, bounded
/// wait. Signal and wait failures are logged and the protocol continues;
/// it never blocks longer than `terminate_grace + kill_grace`.
pub async fn escalate<C>(child: &mut C, terminate_grace: Duration, kill_grace: Duration) -> Escalation
where
    C: ChildControl + ?Sized,
{
    info!("terminating job");
    if let Err(err) = child.terminate() {
        warn!(%err, "graceful stop signal failed");
    }
    if let WaitOutcome::Exited { code } = bounded_wait(child, terminate_grace).await {
        return Escalation::Terminated { code };
    }

    warn!(
        grace_seconds = terminate_grace.as_secs(),
        "process taking too long to terminate, killing"
    );
    if let Err(err) = child.kill() {
        warn!(%err, "forceful stop signal failed");
    }
    if let WaitOutcome::Exited { code } = bounded_wait(child, kill_grace).await {
        return Escalation::Killed { code };
    }

    warn!(
        grace_seconds = kill_grace.as_secs(),
        "experiment process failed to stop; abandoning it"
    );
    Escalation::Stuck
}

async fn bounded_wait<C>(child: &mut C, limit: Duration) -> WaitOutcome
where
    C: ChildControl + ?Sized,
{
    match child.wait_for(limit).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(%err, "waiting for child failed");
            WaitOutcome::TimedOut
        }
    }
}
