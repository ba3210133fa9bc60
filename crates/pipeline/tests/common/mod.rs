#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use framewatch_core::job::{Job, JobKind, JobState, NewJob, SourceDescriptor};
use framewatch_core::processor::ProcessorConfig;
use framewatch_core::types::DbId;
use framewatch_pipeline::{JobStore, MemoryJobStore, Supervisor, SupervisorConfig};

/// Reads its spec, then sleeps until signalled.
pub const SLEEPER: &str = "cat >/dev/null; exec sleep 30";
/// Ignores SIGTERM so only a kill ends it.
pub const STUBBORN: &str = "trap '' TERM; cat >/dev/null; sleep 30";
/// Reads its spec and exits successfully.
pub const FINISHER: &str = "cat >/dev/null; exit 0";
/// Dies with a non-zero status and no marker.
pub const CRASHER: &str = "cat >/dev/null; exit 3";
/// Leaves a completion marker, then fails.
pub const MARKER_WRITER: &str = r#"cat >/dev/null
printf '{"job_id":1,"kind":"internal","reason":"boom","written_at":"2026-01-01T00:00:00Z"}' > "$FRAMEWATCH_COMPLETION_MARKER"
exit 1"#;
/// Emits one image frame (seq 5, payload "hi") then sleeps.
pub const ONE_FRAME: &str = r#"cat >/dev/null
printf '\000\000\000\023\001\000\000\000\000\000\000\000\005\000\000\000\000\000\000\000\000hi'
exec sleep 30"#;
/// Emits one image frame (seq 5) and end-of-stream, then exits cleanly.
pub const LAST_FRAMES: &str = r#"cat >/dev/null
printf '\000\000\000\023\001\000\000\000\000\000\000\000\005\000\000\000\000\000\000\000\000hi'
printf '\000\000\000\001\003'
exit 0"#;

/// Supervisor config running `script` through `/bin/sh` with short timings.
pub fn sh_config(script: &str, results_dir: &Path) -> SupervisorConfig {
    SupervisorConfig {
        worker_bin: "/bin/sh".into(),
        worker_args: vec!["-c".into(), script.into()],
        results_dir: results_dir.to_path_buf(),
        poll_interval: Duration::from_millis(50),
        stop_grace: Duration::from_millis(500),
        ..Default::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub supervisor: Arc<Supervisor>,
    pub results: tempfile::TempDir,
}

impl Harness {
    pub fn new(script: &str) -> Self {
        let results = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let supervisor = Arc::new(Supervisor::new(
            sh_config(script, results.path()),
            store.clone() as Arc<dyn JobStore>,
        ));
        Self {
            store,
            supervisor,
            results,
        }
    }

    pub fn with_config(config: SupervisorConfig) -> Self {
        let results = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let supervisor = Arc::new(Supervisor::new(
            SupervisorConfig {
                results_dir: results.path().to_path_buf(),
                ..config
            },
            store.clone() as Arc<dyn JobStore>,
        ));
        Self {
            store,
            supervisor,
            results,
        }
    }

    /// Register a live-preview job directly in the store.
    pub async fn live_job(&self, name: &str) -> Job {
        self.store.create(live_preview(name)).await.unwrap()
    }

    /// Register a job and move it to `Starting` as the controller would.
    pub async fn starting_job(&self, name: &str) -> Job {
        let job = self.live_job(name).await;
        self.store
            .transition(job.id, &[JobState::Stopped], JobState::Starting, None)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn state(&self, id: DbId) -> JobState {
        self.store.get(id).await.unwrap().unwrap().state
    }

    pub async fn wait_for_state(&self, id: DbId, state: JobState) -> bool {
        wait_for_state(&self.store, id, state, Duration::from_secs(5)).await
    }

    pub async fn job(&self, id: DbId) -> Job {
        self.store.get(id).await.unwrap().unwrap()
    }
}

pub fn live_preview(name: &str) -> NewJob {
    NewJob {
        name: name.into(),
        kind: JobKind::LivePreview,
        source: Some(SourceDescriptor::Stream {
            uri: "rtsp://camera.local/1".into(),
        }),
        processor: ProcessorConfig::Passthrough,
        parent_id: None,
    }
}

pub fn offline_batch(name: &str) -> NewJob {
    NewJob {
        name: name.into(),
        kind: JobKind::OfflineBatch,
        source: Some(SourceDescriptor::File {
            path: "/data/clip.mp4".into(),
        }),
        processor: ProcessorConfig::Passthrough,
        parent_id: None,
    }
}

pub fn monitor_of(name: &str, parent_id: DbId) -> NewJob {
    NewJob {
        name: name.into(),
        kind: JobKind::Monitor,
        source: None,
        processor: ProcessorConfig::Passthrough,
        parent_id: Some(parent_id),
    }
}

/// Poll the store until job `id` reaches `state` or `timeout` elapses.
pub async fn wait_for_state(store: &MemoryJobStore, id: DbId, state: JobState, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if store.get(id).await.unwrap().map(|j| j.state) == Some(state) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
