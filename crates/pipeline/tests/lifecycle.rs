//! Lifecycle controller rules, driven against `/bin/sh` stand-in workers.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use common::*;
use framewatch_core::error::CoreError;
use framewatch_core::job::{JobKind, JobState, SourceDescriptor};
use framewatch_pipeline::{JobStore, LifecycleController, LifecycleError, SupervisorConfig};

fn controller(h: &Harness) -> LifecycleController {
    LifecycleController::new(h.store.clone() as Arc<dyn JobStore>, h.supervisor.clone())
}

// ---------------------------------------------------------------------------
// Test: registration rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_validates_names() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);

    assert_matches!(
        lc.register(live_preview("   ")).await,
        Err(LifecycleError::Validation(_))
    );
    assert_matches!(
        lc.register(live_preview(&"x".repeat(129))).await,
        Err(LifecycleError::Validation(_))
    );

    let job = lc.register(live_preview("  front door ")).await.unwrap();
    assert_eq!(job.name, "front door");
    assert_eq!(job.state, JobState::Stopped);

    assert_matches!(
        lc.register(live_preview("front door")).await,
        Err(LifecycleError::Store(CoreError::Conflict(_)))
    );
}

#[tokio::test]
async fn offline_batch_requires_finite_source() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);

    let mut input = offline_batch("batch");
    input.source = Some(SourceDescriptor::Stream {
        uri: "rtsp://camera.local/1".into(),
    });
    assert_matches!(lc.register(input).await, Err(LifecycleError::Validation(_)));

    let mut input = offline_batch("batch");
    input.source = None;
    assert_matches!(lc.register(input).await, Err(LifecycleError::Validation(_)));

    assert!(lc.register(offline_batch("batch")).await.is_ok());
}

#[tokio::test]
async fn monitor_registration_rules() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);

    assert_matches!(
        lc.register(monitor_of("orphan", 99)).await,
        Err(LifecycleError::NotFound(99))
    );

    let parent = lc.register(live_preview("parent")).await.unwrap();
    let monitor = lc.register(monitor_of("monitor", parent.id)).await.unwrap();
    assert_eq!(monitor.kind, JobKind::Monitor);
    assert_eq!(monitor.source, None);

    assert_matches!(
        lc.register(monitor_of("second", parent.id)).await,
        Err(LifecycleError::Validation(_))
    );
    assert_matches!(
        lc.register(monitor_of("nested", monitor.id)).await,
        Err(LifecycleError::Validation(_))
    );
}

// ---------------------------------------------------------------------------
// Test: start/stop rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn monitor_cannot_start_while_parent_stopped() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);
    let parent = lc.register(live_preview("parent")).await.unwrap();
    let monitor = lc.register(monitor_of("monitor", parent.id)).await.unwrap();

    let result = lc.start(monitor.id).await;
    assert_matches!(result, Err(LifecycleError::ParentNotRunning { parent_id, .. }) if parent_id == parent.id);
    assert_eq!(h.supervisor.worker_count().await, 0);
    assert_eq!(lc.get(monitor.id).await.unwrap().state, JobState::Stopped);
}

#[tokio::test]
async fn double_start_is_rejected_without_changes() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);
    let job = lc.register(live_preview("cam")).await.unwrap();

    let started = lc.start(job.id).await.unwrap();
    assert_eq!(started.state, JobState::Starting);
    let pid = h.supervisor.handle(job.id).await.unwrap().pid;

    assert_matches!(lc.start(job.id).await, Err(LifecycleError::AlreadyActive(_)));
    assert_eq!(h.supervisor.worker_count().await, 1);
    assert_eq!(h.supervisor.handle(job.id).await.unwrap().pid, pid);
    assert!(lc.get(job.id).await.unwrap().state.is_active());

    lc.stop(job.id).await.unwrap();
}

#[tokio::test]
async fn parent_stop_is_blocked_by_running_monitor() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);
    let parent = lc.register(live_preview("parent")).await.unwrap();
    let monitor = lc.register(monitor_of("monitor", parent.id)).await.unwrap();

    lc.start(parent.id).await.unwrap();
    assert!(h.wait_for_state(parent.id, JobState::Running).await);
    lc.start(monitor.id).await.unwrap();

    let blocked = lc.stop(parent.id).await;
    assert_matches!(
        blocked,
        Err(LifecycleError::MonitorRunning { monitor_id, .. }) if monitor_id == monitor.id
    );
    assert!(lc.get(parent.id).await.unwrap().state.is_active());
    assert!(h.supervisor.is_registered(parent.id).await);

    assert_eq!(lc.stop(monitor.id).await.unwrap().state, JobState::Stopped);
    assert_eq!(lc.stop(parent.id).await.unwrap().state, JobState::Stopped);
    assert_eq!(h.supervisor.worker_count().await, 0);
}

#[tokio::test]
async fn stop_of_inactive_job_is_a_noop() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);
    let job = lc.register(live_preview("cam")).await.unwrap();

    let stopped = lc.stop(job.id).await.unwrap();
    assert_eq!(stopped.state, JobState::Stopped);
    assert_eq!(stopped.updated_at, job.updated_at);
}

#[tokio::test]
async fn spawn_failure_moves_job_to_error() {
    let h = Harness::with_config(SupervisorConfig {
        worker_bin: "/nonexistent/framewatch-worker".into(),
        ..Default::default()
    });
    let lc = controller(&h);
    let job = lc.register(live_preview("cam")).await.unwrap();

    assert_matches!(lc.start(job.id).await, Err(LifecycleError::Supervisor(_)));
    let job = lc.get(job.id).await.unwrap();
    assert_eq!(job.state, JobState::Error);
    assert!(job.last_error.is_some());
    assert!(!h.supervisor.is_registered(job.id).await);
}

#[tokio::test]
async fn completed_job_can_be_restarted() {
    let h = Harness::new(FINISHER);
    let lc = controller(&h);
    let job = lc.register(offline_batch("batch")).await.unwrap();

    lc.start(job.id).await.unwrap();
    assert!(h.wait_for_state(job.id, JobState::Completed).await);

    let again = lc.start(job.id).await.unwrap();
    assert_eq!(again.state, JobState::Starting);
    assert!(h.wait_for_state(job.id, JobState::Completed).await);
}

#[tokio::test]
async fn slow_stop_does_not_block_other_jobs() {
    let h = Harness::with_config(SupervisorConfig {
        stop_grace: Duration::from_secs(2),
        ..sh_config(STUBBORN, Path::new("unused"))
    });
    let lc = Arc::new(controller(&h));
    let slow = lc.register(live_preview("slow")).await.unwrap();
    let other = lc.register(live_preview("other")).await.unwrap();
    lc.start(slow.id).await.unwrap();
    assert!(h.wait_for_state(slow.id, JobState::Running).await);

    let stopping = tokio::spawn({
        let lc = Arc::clone(&lc);
        async move { lc.stop(slow.id).await }
    });
    // Recorded as stopped while the worker sits out its grace period.
    assert!(h.wait_for_state(slow.id, JobState::Stopped).await);
    assert!(h.supervisor.is_registered(slow.id).await);

    let began = Instant::now();
    lc.start(other.id).await.unwrap();
    assert!(began.elapsed() < Duration::from_millis(500), "{:?}", began.elapsed());
    assert_matches!(lc.start(slow.id).await, Err(LifecycleError::Stopping(_)));
    assert_matches!(lc.delete(slow.id).await, Err(LifecycleError::Stopping(_)));

    assert_eq!(stopping.await.unwrap().unwrap().state, JobState::Stopped);
    assert!(!h.supervisor.is_registered(slow.id).await);
    assert!(h.supervisor.is_registered(other.id).await);
}

// ---------------------------------------------------------------------------
// Test: release after the last subscriber leaves
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_stops_unwatched_live_job() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);
    let job = lc.register(live_preview("cam")).await.unwrap();
    lc.start(job.id).await.unwrap();

    let channel = h.supervisor.channel(job.id).await.unwrap();
    let subscription = channel.subscribe();
    assert!(lc.release(job.id).await.unwrap().is_none());
    assert!(h.supervisor.is_registered(job.id).await);

    drop(subscription);
    let released = lc.release(job.id).await.unwrap().unwrap();
    assert_eq!(released.state, JobState::Stopped);
    assert!(!h.supervisor.is_registered(job.id).await);
    assert!(channel.is_closed());
}

#[tokio::test]
async fn release_leaves_offline_jobs_running() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);
    let job = lc.register(offline_batch("batch")).await.unwrap();
    lc.start(job.id).await.unwrap();

    assert!(lc.release(job.id).await.unwrap().is_none());
    assert!(h.supervisor.is_registered(job.id).await);

    lc.stop(job.id).await.unwrap();
}

#[tokio::test]
async fn releasing_monitor_releases_unwatched_parent() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);
    let parent = lc.register(live_preview("parent")).await.unwrap();
    let monitor = lc.register(monitor_of("monitor", parent.id)).await.unwrap();
    lc.start(parent.id).await.unwrap();
    assert!(h.wait_for_state(parent.id, JobState::Running).await);
    lc.start(monitor.id).await.unwrap();

    let parent_view = h.supervisor.channel(parent.id).await.unwrap().subscribe();
    let monitor_view = h.supervisor.channel(monitor.id).await.unwrap().subscribe();

    // The parent viewer leaves first; the monitor keeps the parent alive.
    drop(parent_view);
    assert!(lc.release(parent.id).await.unwrap().is_none());
    assert!(h.supervisor.is_registered(parent.id).await);

    drop(monitor_view);
    let released = lc.release(monitor.id).await.unwrap().unwrap();
    assert_eq!(released.id, monitor.id);
    assert_eq!(released.state, JobState::Stopped);
    assert_eq!(h.state(parent.id).await, JobState::Stopped);
    assert_eq!(h.supervisor.worker_count().await, 0);
}

#[tokio::test]
async fn watched_parent_outlives_released_monitor() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);
    let parent = lc.register(live_preview("parent")).await.unwrap();
    let monitor = lc.register(monitor_of("monitor", parent.id)).await.unwrap();
    lc.start(parent.id).await.unwrap();
    assert!(h.wait_for_state(parent.id, JobState::Running).await);
    lc.start(monitor.id).await.unwrap();

    let _parent_view = h.supervisor.channel(parent.id).await.unwrap().subscribe();

    let released = lc.release(monitor.id).await.unwrap().unwrap();
    assert_eq!(released.state, JobState::Stopped);
    assert_eq!(h.state(parent.id).await, JobState::Running);
    assert!(h.supervisor.is_registered(parent.id).await);

    lc.stop(parent.id).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: delete rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_rejects_active_jobs_and_parents() {
    let h = Harness::new(SLEEPER);
    let lc = controller(&h);
    let parent = lc.register(live_preview("parent")).await.unwrap();
    let monitor = lc.register(monitor_of("monitor", parent.id)).await.unwrap();

    assert_matches!(lc.delete(parent.id).await, Err(LifecycleError::HasMonitors(_)));

    lc.start(parent.id).await.unwrap();
    lc.delete(monitor.id).await.unwrap();
    assert_matches!(lc.delete(parent.id).await, Err(LifecycleError::StillActive(_)));

    lc.stop(parent.id).await.unwrap();
    lc.delete(parent.id).await.unwrap();
    assert_matches!(lc.get(parent.id).await, Err(LifecycleError::NotFound(_)));
    assert!(lc.list().await.unwrap().is_empty());
}
