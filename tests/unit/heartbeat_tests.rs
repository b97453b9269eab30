//! Unit tests for the liveness reporter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use dispatch_agent::dispatch::{DispatchFuture, Dispatcher};
use dispatch_agent::models::job::{
    DeviceStatus, ExperimentPayload, FinishReport, Job, RemoteJobState,
};
use dispatch_agent::orchestrator::heartbeat::spawn_heartbeat;
use dispatch_agent::AppError;

const INTERVAL: Duration = Duration::from_secs(5);

/// Records heartbeats; rejects every report after `accept` of them.
struct BeatRecorder {
    beats: Mutex<Vec<DeviceStatus>>,
    accept: usize,
}

impl BeatRecorder {
    fn accepting(accept: usize) -> Arc<Self> {
        Arc::new(Self {
            beats: Mutex::new(Vec::new()),
            accept,
        })
    }

    fn beats(&self) -> Vec<DeviceStatus> {
        self.beats.lock().unwrap().clone()
    }
}

fn unused<T: Send + 'static>() -> DispatchFuture<'static, T> {
    Box::pin(async { Err(AppError::Dispatch("not used by heartbeat".into())) })
}

impl Dispatcher for BeatRecorder {
    fn fetch_queue(&self) -> DispatchFuture<'_, Vec<Job>> {
        unused()
    }

    fn fetch_experiment<'a>(&'a self, _: &'a str) -> DispatchFuture<'a, ExperimentPayload> {
        unused()
    }

    fn fetch_job_state<'a>(&'a self, _: &'a str) -> DispatchFuture<'a, RemoteJobState> {
        unused()
    }

    fn notify_start<'a>(&'a self, _: &'a str) -> DispatchFuture<'a, ()> {
        unused()
    }

    fn post_results<'a>(&'a self, _: &'a str, _: &'a FinishReport) -> DispatchFuture<'a, ()> {
        unused()
    }

    fn heartbeat(&self, status: DeviceStatus) -> DispatchFuture<'_, ()> {
        Box::pin(async move {
            let mut beats = self.beats.lock().unwrap();
            beats.push(status);
            if beats.len() > self.accept {
                return Err(AppError::Protocol(
                    "heartbeat rejected with status 500".into(),
                ));
            }
            Ok(())
        })
    }
}

#[tokio::test(start_paused = true)]
async fn first_report_is_immediate_and_reflects_status_changes() {
    let recorder = BeatRecorder::accepting(usize::MAX);
    let (status_tx, status_rx) = watch::channel(DeviceStatus::Idle);
    let cancel = CancellationToken::new();

    let handle = spawn_heartbeat(recorder.clone(), INTERVAL, status_rx, cancel.clone());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(recorder.beats(), [DeviceStatus::Idle]);

    status_tx.send_replace(DeviceStatus::Busy);
    tokio::time::sleep(INTERVAL).await;
    assert_eq!(recorder.beats(), [DeviceStatus::Idle, DeviceStatus::Busy]);

    status_tx.send_replace(DeviceStatus::Idle);
    tokio::time::sleep(INTERVAL).await;
    assert_eq!(
        recorder.beats(),
        [DeviceStatus::Idle, DeviceStatus::Busy, DeviceStatus::Idle]
    );

    cancel.cancel();
    handle.await.unwrap().expect("cancelled reporter exits cleanly");
}

#[tokio::test(start_paused = true)]
async fn rejected_report_ends_task_with_error() {
    let recorder = BeatRecorder::accepting(1);
    let (_status_tx, status_rx) = watch::channel(DeviceStatus::Idle);

    let handle = spawn_heartbeat(
        recorder.clone(),
        INTERVAL,
        status_rx,
        CancellationToken::new(),
    );

    let result = tokio::time::timeout(INTERVAL * 2, handle)
        .await
        .expect("reporter stops within one interval of the rejection")
        .unwrap();

    assert!(matches!(result, Err(AppError::Protocol(_))));
    assert_eq!(recorder.beats().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_reports_without_final_beat() {
    let recorder = BeatRecorder::accepting(usize::MAX);
    let (_status_tx, status_rx) = watch::channel(DeviceStatus::Idle);
    let cancel = CancellationToken::new();

    let handle = spawn_heartbeat(recorder.clone(), INTERVAL, status_rx, cancel.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;

    cancel.cancel();
    handle.await.unwrap().unwrap();
    let after_cancel = recorder.beats().len();

    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(recorder.beats().len(), after_cancel);
    assert_eq!(after_cancel, 1);
}
