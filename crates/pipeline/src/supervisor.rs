//! Worker process supervision.
//!
//! The [`Supervisor`] owns the registry mapping a job id to its running
//! worker process and the frame channel that process feeds. For every
//! spawned worker it runs two background tasks:
//!
//! - a **pipe pump** that decodes [`FrameMessage`]s from the worker's
//!   stdout and offers them to the job's [`FrameChannel`];
//! - a **liveness poll** that checks the process with `try_wait` every
//!   `poll_interval`, and once the process has exited deregisters it,
//!   records the outcome on the job and closes the channel after the pump
//!   has delivered the tail of the stream.
//!
//! The registry lock is only held for map operations and non-blocking
//! process checks, never across a process wait or file I/O.
//!
//! [`FrameMessage`]: framewatch_core::frame::FrameMessage

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framewatch_core::channel::{EnqueueOutcome, FrameChannel};
use framewatch_core::codec::FrameCodec;
use framewatch_core::job::{Job, JobState, SourceDescriptor};
use framewatch_core::layout::ArtifactLayout;
use framewatch_core::marker::{CompletionMarker, MarkerError};
use framewatch_core::processor::ProcessorConfig;
use framewatch_core::types::DbId;
use framewatch_core::worker_spec::{WorkerSpec, ENV_COMPLETION_MARKER, ENV_JOB_ID};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use crate::config::SupervisorConfig;
use crate::store::JobStore;

/// Reason recorded when a worker dies without leaving a marker.
pub const UNEXPECTED_EXIT_REASON: &str = "worker exited unexpectedly";

/// Upper bound on how long an exited worker's channel stays open for
/// consumers to take its last frames.
const DRAIN_LIMIT: Duration = Duration::from_secs(2);
const DRAIN_CHECK: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("a worker is already running for job {0}")]
    AlreadyRunning(DbId),

    #[error("failed to spawn worker for job {job_id}: {source}")]
    Spawn {
        job_id: DbId,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare output directory: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error("failed to encode worker spec: {0}")]
    Spec(#[from] serde_json::Error),
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker exited after SIGTERM within the grace period.
    Terminated,
    /// The worker ignored SIGTERM and was killed.
    Killed,
    /// The worker had already exited.
    AlreadyExited,
    /// No worker was registered for the job.
    NotRegistered,
}

/// Public view of a registered worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub job_id: DbId,
    pub pid: Option<u32>,
    pub channel: Arc<FrameChannel>,
}

/// Final classification of an exited worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitClass {
    Completed,
    Failed(String),
}

impl ExitClass {
    fn into_transition(self) -> (JobState, Option<String>) {
        match self {
            Self::Completed => (JobState::Completed, None),
            Self::Failed(reason) => (JobState::Error, Some(reason)),
        }
    }
}

/// Classify an exited worker from its completion marker and exit status.
///
/// A marker always means failure. Without one, a successful exit status
/// means the run completed and anything else is an unexpected crash.
pub fn classify_exit(
    marker: Result<Option<CompletionMarker>, MarkerError>,
    status: ExitStatus,
) -> ExitClass {
    match marker {
        Ok(Some(marker)) => ExitClass::Failed(marker.reason),
        Err(e) => ExitClass::Failed(format!("unreadable completion marker: {e}")),
        Ok(None) if status.success() => ExitClass::Completed,
        Ok(None) => ExitClass::Failed(format!("{UNEXPECTED_EXIT_REASON} ({status})")),
    }
}

struct WorkerEntry {
    run_id: u64,
    pid: Option<u32>,
    /// Taken out by `stop` so the process can be awaited without the lock.
    child: Option<Child>,
    channel: Arc<FrameChannel>,
    layout: ArtifactLayout,
    stopping: bool,
    pump: JoinHandle<()>,
    poll: Option<JoinHandle<()>>,
}

impl WorkerEntry {
    fn handle(&self, job_id: DbId) -> WorkerHandle {
        WorkerHandle {
            job_id,
            pid: self.pid,
            channel: Arc::clone(&self.channel),
        }
    }

    /// Wait, at most `limit`, for the pump to hit pipe EOF and for attached
    /// consumers to take what it delivered.
    async fn drain(&mut self, job_id: DbId, limit: Duration) {
        let channel = &self.channel;
        let pump = &mut self.pump;
        let settled = tokio::time::timeout(limit, async {
            let _ = pump.await;
            while !channel.is_empty() && channel.subscriber_count() > 0 {
                tokio::time::sleep(DRAIN_CHECK).await;
            }
        })
        .await;
        if settled.is_err() {
            tracing::debug!(job_id, pending = channel.len(), "Frame drain timed out");
        }
    }

    /// Close the channel and stop the background tasks.
    fn retire(self) {
        self.channel.close();
        self.pump.abort();
        if let Some(poll) = self.poll {
            poll.abort();
        }
    }
}

enum Liveness {
    Alive,
    Exited(WorkerEntry, ExitStatus),
    /// Deregistered, replaced by a newer run, or being stopped.
    Detached,
}

/// Starts, stops and watches worker processes.
pub struct Supervisor {
    config: SupervisorConfig,
    store: Arc<dyn JobStore>,
    registry: Mutex<HashMap<DbId, WorkerEntry>>,
    next_run_id: AtomicU64,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, store: Arc<dyn JobStore>) -> Self {
        Self {
            config,
            store,
            registry: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Artifact layout for `job_id` under the configured results root.
    pub fn layout(&self, job_id: DbId) -> ArtifactLayout {
        ArtifactLayout::new(&self.config.results_dir, job_id)
    }

    /// Worker spec for `job` with this supervisor's tuning applied.
    pub fn spec_for(
        &self,
        job: &Job,
        source: SourceDescriptor,
        processor: ProcessorConfig,
    ) -> WorkerSpec {
        let mut spec = WorkerSpec::for_job(
            job,
            source,
            processor,
            self.layout(job.id).job_dir().to_path_buf(),
        );
        spec.channel_capacity = self.config.channel_capacity;
        spec.enqueue_timeout_ms = self.config.enqueue_timeout.as_millis() as u64;
        spec
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Spawn a worker for `spec.job_id`.
    ///
    /// Rejected without side effects if the job already has a registered
    /// worker. On spawn failure nothing is registered. Starts of one job
    /// must not run concurrently; the lifecycle controller serializes them.
    pub async fn start(self: &Arc<Self>, spec: WorkerSpec) -> Result<WorkerHandle, SupervisorError> {
        let job_id = spec.job_id;
        if self.is_registered(job_id).await {
            return Err(SupervisorError::AlreadyRunning(job_id));
        }

        let payload = serde_json::to_vec(&spec)?;
        let layout = ArtifactLayout::from_job_dir(&spec.output_dir);
        tokio::fs::create_dir_all(layout.job_dir()).await?;
        marker_io(layout.marker_path(), CompletionMarker::clear).await?;

        let mut registry = self.registry.lock().await;
        if registry.contains_key(&job_id) {
            return Err(SupervisorError::AlreadyRunning(job_id));
        }

        let mut child = self
            .worker_command(job_id, &layout.marker_path())
            .spawn()
            .map_err(|source| SupervisorError::Spawn { job_id, source })?;
        let pid = child.id();

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // The worker may exit before reading its spec; that surfaces
                // through the liveness poll.
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::warn!(job_id, error = %e, "Failed to write worker spec");
                }
            });
        }

        let channel = Arc::new(FrameChannel::new(self.config.channel_capacity));
        let pump = match child.stdout.take() {
            Some(stdout) => tokio::spawn(pump_frames(
                job_id,
                stdout,
                Arc::clone(&channel),
                self.config.enqueue_timeout,
            )),
            None => tokio::spawn(async {}),
        };

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let entry = WorkerEntry {
            run_id,
            pid,
            child: Some(child),
            channel,
            layout,
            stopping: false,
            pump,
            poll: None,
        };
        let handle = entry.handle(job_id);
        registry.insert(job_id, entry);

        let poll = tokio::spawn(Arc::clone(self).poll_liveness(job_id, run_id));
        if let Some(entry) = registry.get_mut(&job_id) {
            entry.poll = Some(poll);
        }

        tracing::info!(job_id, pid, kind = %spec.kind, source = %spec.source.location(), "Worker spawned");
        Ok(handle)
    }

    fn worker_command(&self, job_id: DbId, marker_path: &Path) -> Command {
        let mut cmd = Command::new(&self.config.worker_bin);
        cmd.args(&self.config.worker_args)
            .env(ENV_JOB_ID, job_id.to_string())
            .env(ENV_COMPLETION_MARKER, marker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Terminate the worker for `job_id` and deregister it.
    ///
    /// Sends SIGTERM, waits up to `stop_grace`, then kills. The registry
    /// entry is removed and its channel closed whatever state the process
    /// was in.
    pub async fn stop(&self, job_id: DbId) -> StopOutcome {
        let (child, pid, run_id) = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.get_mut(&job_id) else {
                return StopOutcome::NotRegistered;
            };
            entry.stopping = true;
            (entry.child.take(), entry.pid, entry.run_id)
        };

        let outcome = match child {
            Some(child) => terminate(job_id, child, pid, self.config.stop_grace).await,
            None => StopOutcome::AlreadyExited,
        };

        let entry = {
            let mut registry = self.registry.lock().await;
            match registry.get(&job_id) {
                Some(entry) if entry.run_id == run_id => registry.remove(&job_id),
                _ => None,
            }
        };
        if let Some(entry) = entry {
            entry.retire();
        }

        tracing::info!(job_id, ?outcome, "Worker stopped");
        outcome
    }

    /// Stop every registered worker.
    pub async fn shutdown(&self) {
        let jobs = self.registered_jobs().await;
        if jobs.is_empty() {
            return;
        }
        tracing::info!(count = jobs.len(), "Stopping all workers");
        futures::future::join_all(jobs.into_iter().map(|job_id| self.stop(job_id))).await;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn is_registered(&self, job_id: DbId) -> bool {
        self.registry.lock().await.contains_key(&job_id)
    }

    pub async fn handle(&self, job_id: DbId) -> Option<WorkerHandle> {
        self.registry
            .lock()
            .await
            .get(&job_id)
            .map(|entry| entry.handle(job_id))
    }

    /// The frame channel of a registered worker.
    pub async fn channel(&self, job_id: DbId) -> Option<Arc<FrameChannel>> {
        self.registry
            .lock()
            .await
            .get(&job_id)
            .map(|entry| Arc::clone(&entry.channel))
    }

    /// Ids of all registered jobs, ascending.
    pub async fn registered_jobs(&self) -> Vec<DbId> {
        let mut ids: Vec<DbId> = self.registry.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn worker_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    async fn poll_liveness(self: Arc<Self>, job_id: DbId, run_id: u64) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut running = false;

        loop {
            ticker.tick().await;
            match self.check(job_id, run_id).await {
                Liveness::Alive => {
                    if !running {
                        running = true;
                        self.mark_running(job_id).await;
                    }
                }
                Liveness::Exited(entry, status) => {
                    self.finish(job_id, entry, status).await;
                    return;
                }
                Liveness::Detached => return,
            }
        }
    }

    async fn check(&self, job_id: DbId, run_id: u64) -> Liveness {
        let mut registry = self.registry.lock().await;
        let Some(entry) = registry.get_mut(&job_id) else {
            return Liveness::Detached;
        };
        if entry.run_id != run_id || entry.stopping {
            return Liveness::Detached;
        }
        let Some(child) = entry.child.as_mut() else {
            return Liveness::Detached;
        };

        let status = match child.try_wait() {
            Ok(None) => return Liveness::Alive,
            Ok(Some(status)) => status,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Liveness check failed");
                return Liveness::Alive;
            }
        };

        match registry.remove(&job_id) {
            Some(entry) => Liveness::Exited(entry, status),
            None => Liveness::Detached,
        }
    }

    async fn mark_running(&self, job_id: DbId) {
        match self
            .store
            .transition(job_id, &[JobState::Starting], JobState::Running, None)
            .await
        {
            Ok(Some(_)) => tracing::info!(job_id, "Job running"),
            Ok(None) => {}
            Err(e) => tracing::warn!(job_id, error = %e, "Failed to mark job running"),
        }
    }

    async fn finish(&self, job_id: DbId, mut entry: WorkerEntry, status: ExitStatus) {
        // The poll task is the caller; detach rather than abort it.
        entry.poll.take();
        let marker = marker_io(entry.layout.marker_path(), CompletionMarker::read).await;

        let class = classify_exit(marker, status);
        match &class {
            ExitClass::Completed => tracing::info!(job_id, %status, "Worker completed"),
            ExitClass::Failed(reason) => {
                tracing::warn!(job_id, %status, reason = %reason, "Worker failed")
            }
        }

        let (state, error) = class.into_transition();
        if let Err(e) = self
            .store
            .transition(job_id, &JobState::ACTIVE, state, error)
            .await
        {
            tracing::warn!(job_id, error = %e, "Failed to record worker exit");
        }

        // After the transition, so a relay that ends on the tail of the
        // stream finds the job already inactive.
        entry.drain(job_id, DRAIN_LIMIT).await;
        entry.retire();
    }
}

/// Run a blocking marker file operation on the blocking pool.
async fn marker_io<T, F>(path: PathBuf, op: F) -> Result<T, MarkerError>
where
    T: Send + 'static,
    F: FnOnce(&Path) -> Result<T, MarkerError> + Send + 'static,
{
    let at = path.clone();
    tokio::task::spawn_blocking(move || op(&at))
        .await
        .unwrap_or_else(|e| {
            Err(MarkerError::Io {
                path,
                source: std::io::Error::other(e),
            })
        })
}

/// Decode frames from a worker's stdout into its channel until EOF.
async fn pump_frames(
    job_id: DbId,
    stdout: ChildStdout,
    channel: Arc<FrameChannel>,
    enqueue_timeout: Duration,
) {
    let mut frames = FramedRead::new(stdout, FrameCodec::new());
    let mut dropped = 0u64;

    while let Some(item) = frames.next().await {
        match item {
            Ok(msg) => {
                if channel.enqueue(msg, enqueue_timeout).await == EnqueueOutcome::Dropped {
                    dropped += 1;
                }
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Corrupt frame stream from worker");
                break;
            }
        }
    }
    tracing::debug!(job_id, dropped, "Worker frame pipe closed");
}

async fn terminate(
    job_id: DbId,
    mut child: Child,
    pid: Option<u32>,
    grace: Duration,
) -> StopOutcome {
    if let Ok(Some(_)) = child.try_wait() {
        return StopOutcome::AlreadyExited;
    }

    send_sigterm(&mut child, pid);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => StopOutcome::Terminated,
        Err(_) => {
            tracing::warn!(job_id, "Worker ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                tracing::error!(job_id, error = %e, "Failed to kill worker");
            }
            StopOutcome::Killed
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child, pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // Safety: `kill` has no memory-safety preconditions; the pid belongs to
    // a child we have not yet reaped.
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret != 0 {
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::ExitStatusExt;

    use framewatch_core::marker::FailureKind;

    use super::*;

    fn status(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn marker_means_failure_even_on_clean_exit() {
        let marker = CompletionMarker::new(1, FailureKind::SourceUnavailable, "cannot open source");
        assert_eq!(
            classify_exit(Ok(Some(marker)), status(0)),
            ExitClass::Failed("cannot open source".into())
        );
    }

    #[test]
    fn clean_exit_without_marker_completes() {
        assert_eq!(classify_exit(Ok(None), status(0)), ExitClass::Completed);
    }

    #[test]
    fn abnormal_exit_without_marker_is_unexpected() {
        let class = classify_exit(Ok(None), status(137));
        match class {
            ExitClass::Failed(reason) => assert!(reason.starts_with(UNEXPECTED_EXIT_REASON)),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn signal_death_without_marker_is_unexpected() {
        let killed = ExitStatus::from_raw(libc::SIGKILL);
        assert!(matches!(
            classify_exit(Ok(None), killed),
            ExitClass::Failed(_)
        ));
    }
}
