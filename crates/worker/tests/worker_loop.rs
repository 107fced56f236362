mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use simjob_core::job::{JobFailureKind, JobStatus};
use simjob_core::keys::result_key;
use simjob_core::message::JobMessage;
use simjob_core::progress::ProgressEvent;
use simjob_db::{CancelOutcome, ClaimOutcome, JobStore};
use simjob_queue::{Queue, QueueDepth};
use simjob_storage::ObjectStore;
use simjob_worker::{ProcessOutcome, WorkerConfig};
use tokio_util::sync::CancellationToken;

use common::Harness;

async fn drain(sub: &mut simjob_events::Subscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(ev) = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("subscription should end")
    {
        events.push(ev);
    }
    events
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_runs_complete_with_heartbeats_progress_and_artifact() {
    let h = Harness::new(200, 50, 3);
    let id = h.submit(json!({"runs": 100, "step_ms": 4})).await;
    let mut first = h.publisher.subscribe(id);
    let mut second = h.publisher.subscribe(id);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let msg = h.receive().await;
    let outcome = h.worker.process_message(msg, &CancellationToken::new()).await;
    assert_eq!(outcome, ProcessOutcome::Completed);

    assert!(h.queue.heartbeats() >= 3, "heartbeats: {}", h.queue.heartbeats());

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.progress, 1.0);
    assert_eq!(job.result_ref.as_deref(), Some(result_key(id).as_str()));
    let started = job.started_at.unwrap();
    let completed = job.completed_at.unwrap();
    assert!(completed > started && started > job.created_at);

    let bytes = h.objects.get(&result_key(id)).await.unwrap().unwrap();
    let artifact: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(artifact["runs"], 100);

    // Both observers see the whole sequence, in order, ending at completion.
    for sub in [&mut first, &mut second] {
        let events = drain(sub).await;
        let progress: Vec<f64> = events.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![0.0, 0.25, 0.5, 0.75, 1.0, 1.0]);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(events.last().unwrap().status, JobStatus::Completed);
    }

    assert_eq!(h.queue.depth().await.unwrap(), QueueDepth::default());
}

// ---------------------------------------------------------------------------
// Idempotency / at-least-once
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redelivery_after_terminal_is_acked_without_side_effects() {
    let h = Harness::new(500, 100, 3);
    let id = h.submit(json!({"runs": 4})).await;
    let msg = h.receive().await;
    assert_eq!(
        h.worker.process_message(msg, &CancellationToken::new()).await,
        ProcessOutcome::Completed
    );
    let before = h.job(id).await;

    // A duplicate delivery of the same job.
    h.queue.enqueue(&JobMessage::new(id).encode()).await.unwrap();
    let dup = h.receive().await;
    assert_eq!(
        h.worker.process_message(dup, &CancellationToken::new()).await,
        ProcessOutcome::AlreadyTerminal
    );

    assert_eq!(h.job(id).await, before);
    assert_eq!(h.objects.put_count(&result_key(id)).await, 1);
    assert_eq!(h.queue.depth().await.unwrap(), QueueDepth::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crashed_attempt_is_redelivered_and_completed_once() {
    let h = Harness::new(150, 40, 3);
    let id = h.submit(json!({"runs": 4})).await;

    // A first worker claims the job and dies without acking.
    let crashed = h.receive().await;
    assert_matches!(h.store.claim(id, 3).await.unwrap(), ClaimOutcome::Claimed(_));
    drop(crashed);

    let redelivered = h.receive().await;
    assert_eq!(redelivered.receive_count, 2);
    assert_eq!(
        h.worker
            .process_message(redelivered, &CancellationToken::new())
            .await,
        ProcessOutcome::Completed
    );

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(h.objects.put_count(&result_key(id)).await, 1);
    assert_eq!(h.queue.depth().await.unwrap(), QueueDepth::default());
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_transient_failures_end_as_poison_message() {
    let h = Harness::new(100, 30, 2);
    let id = h.submit(json!({"runs": 1, "mode": "transient"})).await;

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let msg = h.receive().await;
        outcomes.push(h.worker.process_message(msg, &CancellationToken::new()).await);
    }
    assert_eq!(
        outcomes,
        vec![
            ProcessOutcome::Retrying,
            ProcessOutcome::Retrying,
            ProcessOutcome::Poisoned
        ]
    );

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobFailureKind::PoisonMessage);

    // Acked, so it never loops and never reaches the dead-letter target.
    assert!(h
        .queue
        .receive(Duration::from_millis(250))
        .await
        .unwrap()
        .is_none());
    assert!(h.queue.dead_letters().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tightest_accepted_delivery_limit_still_records_poison_failure() {
    let config = WorkerConfig {
        max_attempts: 3,
        max_receive_count: 4,
        visibility_timeout: Duration::from_millis(100),
        heartbeat_interval: Duration::from_millis(30),
        ..Default::default()
    };
    config.validate().expect("one delivery beyond the attempts is accepted");

    let h = Harness::from_config(&config);
    let id = h.submit(json!({"runs": 1, "mode": "transient"})).await;

    let mut outcomes = Vec::new();
    while let Some(msg) = h.queue.receive(Duration::from_millis(250)).await.unwrap() {
        outcomes.push(h.worker.process_message(msg, &CancellationToken::new()).await);
    }
    assert_eq!(
        outcomes,
        vec![
            ProcessOutcome::Retrying,
            ProcessOutcome::Retrying,
            ProcessOutcome::Retrying,
            ProcessOutcome::Poisoned
        ]
    );

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 4);
    assert_eq!(job.error.unwrap().kind, JobFailureKind::PoisonMessage);
    assert!(h.queue.dead_letters().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_error_fails_on_first_attempt() {
    let h = Harness::new(500, 100, 3);
    let id = h.submit(json!({"runs": 1, "mode": "fatal"})).await;
    let mut sub = h.publisher.subscribe(id);

    let msg = h.receive().await;
    assert_eq!(
        h.worker.process_message(msg, &CancellationToken::new()).await,
        ProcessOutcome::Failed
    );

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobFailureKind::Task);
    assert_eq!(error.attempt, 1);
    assert!(error.message.contains("diverged"));

    let events = drain(&mut sub).await;
    assert_eq!(events.last().unwrap().status, JobStatus::Failed);
    assert!(h.objects.keys().await.is_empty());
    assert_eq!(h.queue.depth().await.unwrap(), QueueDepth::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_panic_is_treated_as_fatal() {
    let h = Harness::new(500, 100, 3);
    let id = h.submit(json!({"runs": 1, "mode": "panic"})).await;

    let msg = h.receive().await;
    assert_eq!(
        h.worker.process_message(msg, &CancellationToken::new()).await,
        ProcessOutcome::Failed
    );

    let error = h.job(id).await.error.unwrap();
    assert_eq!(error.kind, JobFailureKind::Task);
    assert!(error.message.contains("numerical blow-up"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undecodable_message_is_dropped() {
    let h = Harness::new(500, 100, 3);
    h.queue.enqueue("{not json").await.unwrap();

    let msg = h.receive().await;
    assert_eq!(
        h.worker.process_message(msg, &CancellationToken::new()).await,
        ProcessOutcome::Dropped
    );
    assert_eq!(h.queue.depth().await.unwrap(), QueueDepth::default());
}

// ---------------------------------------------------------------------------
// Cancellation and shutdown
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_stops_at_next_checkpoint_and_never_resumes() {
    let h = Harness::new(500, 100, 3);
    let id = h
        .submit(json!({"runs": 200, "step_ms": 5, "mode": "steady"}))
        .await;
    let mut sub = h.publisher.subscribe(id);

    let msg = h.receive().await;
    let worker = h.worker.clone();
    let running =
        tokio::spawn(async move { worker.process_message(msg, &CancellationToken::new()).await });

    // Wait until the task has made some progress.
    loop {
        let job = h.job(id).await;
        if job.status == JobStatus::Running && job.progress > 0.0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_matches!(
        h.service.request_cancel(id).await.unwrap(),
        CancelOutcome::Cancelled(_)
    );
    assert_eq!(running.await.unwrap(), ProcessOutcome::Cancelled);

    let job = h.job(id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.progress < 1.0);
    assert!(job.completed_at.is_some());

    let events = drain(&mut sub).await;
    assert_eq!(events.last().unwrap().status, JobStatus::Cancelled);

    // The released message comes back, hits the guard, and is acked.
    let again = h.receive().await;
    assert_eq!(
        h.worker.process_message(again, &CancellationToken::new()).await,
        ProcessOutcome::AlreadyTerminal
    );
    assert_eq!(h.job(id).await.status, JobStatus::Cancelled);
    assert!(h.objects.keys().await.is_empty());
    assert_eq!(h.queue.depth().await.unwrap(), QueueDepth::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_interrupts_and_releases_message() {
    let h = Harness::new(5_000, 1_000, 3);
    let id = h
        .submit(json!({"runs": 200, "step_ms": 5, "mode": "steady"}))
        .await;

    let msg = h.receive().await;
    let shutdown = CancellationToken::new();
    let worker = h.worker.clone();
    let token = shutdown.clone();
    let running = tokio::spawn(async move { worker.process_message(msg, &token).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    assert_eq!(running.await.unwrap(), ProcessOutcome::Interrupted);

    // Released immediately rather than after the 5s window.
    let redelivered = h
        .queue
        .receive(Duration::from_millis(100))
        .await
        .unwrap()
        .expect("released message should be visible");
    assert_eq!(redelivered.receive_count, 2);
    assert_eq!(h.job(id).await.status, JobStatus::Running);
}
