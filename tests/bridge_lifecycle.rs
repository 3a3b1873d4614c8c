//! Integration tests for worker lifecycle: health failure escalation,
//! crash detection, restart idempotence, and what survives a restart.

mod helpers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::fake_worker::{FakeWorker, Reply};
use helpers::wait_until;
use tokio::sync::mpsc;
use workbridge::bridge::{HealthCheckOutcome, LaunchFuture};
use workbridge::config::{BridgeSettings, QueueSettings};
use workbridge::protocol::{LogsPayload, StatusPayload};
use workbridge::{
    Bridge, BridgeError, BridgePhase, Frame, Message, MessageKind, MessageQueue, Payload, Priority,
    WorkerLauncher, WorkerLink,
};

const SETTLE: Duration = Duration::from_secs(2);

fn settings() -> BridgeSettings {
    BridgeSettings {
        startup_timeout_ms: 1_000,
        health_check_timeout_ms: 30,
        health_check_interval_ms: 60_000,
        health_failure_threshold: 3,
        restart_base_delay_ms: 5,
        restart_max_delay_ms: 20,
        recovery_poll_interval_ms: 60_000,
        ..BridgeSettings::default()
    }
}

fn bridge_with(worker: &FakeWorker, settings: BridgeSettings) -> Bridge {
    Bridge::new(
        settings,
        worker.launcher(),
        MessageQueue::new(&QueueSettings::default()),
    )
}

fn status_request(entity_id: &str) -> Message {
    Message::for_entity(entity_id, Payload::Status(StatusPayload::default()))
}

fn silent_on(kind: MessageKind) -> impl Fn(&Frame) -> Reply + Send + Sync + 'static {
    move |frame: &Frame| {
        if frame.kind() == kind {
            Reply::Silent
        } else {
            Reply::Echo
        }
    }
}

/// Worker that exits before sending anything.
struct ExitsAtOnce;

impl WorkerLauncher for ExitsAtOnce {
    fn launch(&self) -> LaunchFuture<'_> {
        Box::pin(async {
            let (outbound_tx, _outbound_rx) = mpsc::channel(1);
            let (_inbound_tx, inbound_rx) = mpsc::channel(1);
            Ok(WorkerLink::detached(outbound_tx, inbound_rx))
        })
    }
}

#[tokio::test]
async fn worker_exiting_during_startup_fails_fast() {
    let bridge = Bridge::new(
        BridgeSettings {
            startup_timeout_ms: 30_000,
            ..settings()
        },
        Arc::new(ExitsAtOnce),
        MessageQueue::new(&QueueSettings::default()),
    );

    let started = tokio::time::timeout(Duration::from_secs(2), bridge.initialize())
        .await
        .expect("startup should not wait for the ready timeout");

    assert!(matches!(started, Err(BridgeError::Initialization(_))));
    assert_eq!(bridge.phase(), BridgePhase::Crashed);
}

#[tokio::test]
async fn health_failures_escalate_to_exactly_one_restart() {
    let worker = FakeWorker::echo();
    let bridge = bridge_with(&worker, settings());
    bridge.initialize().await.expect("worker should start");
    assert_eq!(bridge.check_health().await, HealthCheckOutcome::Passed);
    assert_eq!(bridge.phase(), BridgePhase::Healthy);

    worker.set_responder(silent_on(MessageKind::Health));
    assert_eq!(
        bridge.check_health().await,
        HealthCheckOutcome::Failed { consecutive: 1 }
    );
    assert_eq!(bridge.phase(), BridgePhase::Degraded);
    assert!(bridge.is_healthy());
    assert_eq!(
        bridge.check_health().await,
        HealthCheckOutcome::Failed { consecutive: 2 }
    );
    assert_eq!(bridge.check_health().await, HealthCheckOutcome::Crashed);
    worker.set_responder(|_| Reply::Echo);

    assert!(
        wait_until(SETTLE, || worker.launches() == 2 && bridge.is_healthy()).await,
        "worker should be restarted"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.launches(), 2);

    let state = bridge.state();
    assert_eq!(state.restart_attempts, 1);
    assert_eq!(state.consecutive_health_failures, 0);
    assert!(!state.crashed);
    assert!(state.last_restart_time.is_some());
}

#[tokio::test]
async fn concurrent_restart_requests_launch_once() {
    let worker = FakeWorker::echo();
    let bridge = bridge_with(&worker, settings());
    bridge.initialize().await.expect("worker should start");

    let (first, second) = tokio::join!(bridge.attempt_restart(), bridge.attempt_restart());

    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));
    assert!(wait_until(SETTLE, || bridge.is_healthy()).await);
    assert_eq!(worker.launches(), 2);
    assert_eq!(bridge.state().restart_attempts, 1);
}

#[tokio::test]
async fn restart_rejects_pending_requests_but_keeps_handlers() {
    let worker = FakeWorker::with_responder(silent_on(MessageKind::Status));
    let bridge = bridge_with(&worker, settings());
    bridge.initialize().await.expect("worker should start");

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    bridge.add_handler(move |frame: &Frame| sink.lock().unwrap().push(frame.clone()));

    let pending = tokio::spawn({
        let bridge = bridge.clone();
        async move {
            bridge
                .send_direct(status_request("app"), Duration::from_secs(10))
                .await
        }
    });
    assert!(wait_until(SETTLE, || !worker.requests().is_empty()).await);
    assert_eq!(bridge.health_status().pending_requests, 1);

    bridge.attempt_restart().await.expect("restart should succeed");

    assert_eq!(pending.await.unwrap(), Err(BridgeError::Restarting));
    assert_eq!(bridge.health_status().pending_requests, 0);
    assert_eq!(bridge.health_status().handlers, 1);

    worker
        .emit(Frame::broadcast(
            Some("app".to_string()),
            Payload::Logs(LogsPayload {
                lines: None,
                entries: vec!["listening on :3000".to_string()],
            }),
        ))
        .await;
    assert!(wait_until(SETTLE, || received.lock().unwrap().len() == 1).await);
    assert_eq!(received.lock().unwrap()[0].kind(), MessageKind::Logs);
}

#[tokio::test]
async fn worker_exit_triggers_automatic_restart() {
    let worker = FakeWorker::echo();
    let bridge = bridge_with(&worker, settings());
    bridge.initialize().await.expect("worker should start");

    worker.crash().await;

    assert!(
        wait_until(SETTLE, || worker.launches() == 2 && bridge.is_healthy()).await,
        "crashed worker should be relaunched"
    );
    let reply = bridge
        .send_message(status_request("app"), Priority::Normal)
        .await
        .expect("restarted worker should answer");
    assert_eq!(reply.kind(), MessageKind::Status);
    assert_eq!(bridge.state().restart_attempts, 1);
}

#[tokio::test]
async fn exhausted_restart_budget_leaves_bridge_crashed() {
    let worker = FakeWorker::echo();
    let bridge = bridge_with(
        &worker,
        BridgeSettings {
            max_restart_attempts: 1,
            ..settings()
        },
    );
    bridge.initialize().await.expect("worker should start");

    bridge.attempt_restart().await.expect("first restart fits the budget");
    let second = bridge.attempt_restart().await;

    assert!(matches!(
        second,
        Err(BridgeError::RestartBudgetExhausted { attempts: 1, .. })
    ));
    assert_eq!(bridge.phase(), BridgePhase::Crashed);
    assert_eq!(worker.launches(), 2);

    let rejected = bridge
        .send_message(status_request("app"), Priority::High)
        .await;
    assert!(matches!(rejected, Err(BridgeError::Crashed(_))));
}

#[tokio::test]
async fn worker_error_frames_surface_as_worker_errors() {
    let worker = FakeWorker::with_responder(|frame: &Frame| match frame.kind() {
        MessageKind::Status => Reply::Fail("unknown entity app".to_string()),
        _ => Reply::Echo,
    });
    let bridge = bridge_with(&worker, settings());

    let result = bridge
        .send_message(status_request("app"), Priority::Normal)
        .await;

    assert_eq!(result, Err(BridgeError::worker("unknown entity app")));
    assert_eq!(bridge.queue_stats().total_retried, 0);
    assert!(bridge.is_healthy());
}

#[tokio::test]
async fn shutdown_rejects_in_flight_requests() {
    let worker = FakeWorker::with_responder(silent_on(MessageKind::Status));
    let bridge = bridge_with(&worker, settings());
    bridge.initialize().await.expect("worker should start");

    let pending = tokio::spawn({
        let bridge = bridge.clone();
        async move {
            bridge
                .send_direct(status_request("app"), Duration::from_secs(10))
                .await
        }
    });
    assert!(wait_until(SETTLE, || !worker.requests().is_empty()).await);

    bridge.shutdown().await;

    assert_eq!(pending.await.unwrap(), Err(BridgeError::Shutdown));
    assert_eq!(bridge.phase(), BridgePhase::ShutDown);
    assert_eq!(bridge.check_health().await, HealthCheckOutcome::Skipped);
}
