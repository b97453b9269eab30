//! Unit tests for `ProcessSupervisor` against real `sh` children.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use dispatch_agent::config::RunnerConfig;
use dispatch_agent::models::job::ExperimentPayload;
use dispatch_agent::orchestrator::supervisor::{
    escalate, ChildControl, Escalation, ProcessSupervisor, SpawnedProcess, WaitOutcome,
};
use dispatch_agent::AppError;

fn sh_runner() -> RunnerConfig {
    RunnerConfig {
        interpreter: "sh".into(),
        interpreter_args: Vec::new(),
        script_name: "job.sh".into(),
        work_root: None,
    }
}

fn payload(code: &str) -> ExperimentPayload {
    ExperimentPayload {
        title: "test".into(),
        code: code.into(),
    }
}

#[tokio::test]
async fn runs_materialized_code_with_piped_stdio() {
    let SpawnedProcess {
        mut supervisor,
        mut stdin,
        mut stdout,
    } = ProcessSupervisor::spawn(&sh_runner(), &payload("read line\necho \"got $line\"\n"))
        .await
        .expect("spawn");
    assert!(supervisor.pid().is_some());
    assert!(supervisor.workspace().join("job.sh").is_file());

    stdin.write_all(b"ping\n").await.unwrap();
    drop(stdin);

    let mut out = String::new();
    stdout.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "got ping\n");

    let outcome = supervisor.wait_for(Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome, WaitOutcome::Exited { code: Some(0) });
    assert_eq!(supervisor.exit_code(), Some(0));
    assert!(supervisor.has_exited());
}

#[tokio::test]
async fn scratch_directory_is_removed_on_drop() {
    let SpawnedProcess { supervisor, .. } =
        ProcessSupervisor::spawn(&sh_runner(), &payload("exit 0\n"))
            .await
            .expect("spawn");
    let workspace = supervisor.workspace().to_path_buf();
    assert!(workspace.exists());

    drop(supervisor);
    assert!(!workspace.exists());
}

#[tokio::test]
async fn work_root_hosts_scratch_directory() {
    let root = tempfile::tempdir().expect("tempdir");
    let runner = RunnerConfig {
        work_root: Some(root.path().to_path_buf()),
        ..sh_runner()
    };

    let SpawnedProcess { supervisor, .. } = ProcessSupervisor::spawn(&runner, &payload("exit 0\n"))
        .await
        .expect("spawn");
    assert!(supervisor.workspace().starts_with(root.path()));
}

#[tokio::test]
async fn bounded_wait_times_out_on_running_child() {
    let SpawnedProcess { mut supervisor, .. } =
        ProcessSupervisor::spawn(&sh_runner(), &payload("exec sleep 30\n"))
            .await
            .expect("spawn");

    let started = Instant::now();
    let outcome = supervisor.wait_for(Duration::from_millis(100)).await.unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!supervisor.has_exited());
}

#[tokio::test]
async fn nonzero_exit_code_is_reported() {
    let SpawnedProcess { mut supervisor, .. } =
        ProcessSupervisor::spawn(&sh_runner(), &payload("exit 3\n"))
            .await
            .expect("spawn");

    let outcome = supervisor.wait_for(Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome, WaitOutcome::Exited { code: Some(3) });
}

#[tokio::test]
async fn terminate_stops_cooperative_child() {
    let SpawnedProcess { mut supervisor, .. } =
        ProcessSupervisor::spawn(&sh_runner(), &payload("exec sleep 30\n"))
            .await
            .expect("spawn");

    let outcome = escalate(
        &mut supervisor,
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .await;
    // Killed by a signal, so there is no exit code.
    assert_eq!(outcome, Escalation::Terminated { code: None });
}

#[tokio::test]
async fn kill_stops_child_ignoring_terminate() {
    let SpawnedProcess { mut supervisor, .. } = ProcessSupervisor::spawn(
        &sh_runner(),
        &payload("trap '' TERM\nwhile :; do sleep 1; done\n"),
    )
    .await
    .expect("spawn");
    // Give the shell time to install the trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = escalate(
        &mut supervisor,
        Duration::from_millis(300),
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(outcome, Escalation::Killed { code: None });
}

#[tokio::test]
async fn signals_after_exit_are_noops() {
    let SpawnedProcess { mut supervisor, .. } =
        ProcessSupervisor::spawn(&sh_runner(), &payload("exit 0\n"))
            .await
            .expect("spawn");
    supervisor.wait_for(Duration::from_secs(5)).await.unwrap();

    supervisor.terminate().expect("terminate after exit");
    supervisor.kill().expect("kill after exit");
}

#[tokio::test]
async fn missing_interpreter_is_process_error() {
    let runner = RunnerConfig {
        interpreter: "definitely-not-an-interpreter".into(),
        ..sh_runner()
    };

    let err = ProcessSupervisor::spawn(&runner, &payload("")).await.unwrap_err();
    assert!(matches!(err, AppError::Process(_)));
}
