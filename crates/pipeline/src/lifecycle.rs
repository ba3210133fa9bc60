//! Job lifecycle decisions.
//!
//! The [`LifecycleController`] is the single place that moves jobs between
//! states on behalf of callers. Every decision runs under one mutex so
//! that checks such as "the parent is running" and "no monitor is active"
//! hold for the whole decision.
//!
//! Worker teardown (SIGTERM, grace wait, kill) runs after that mutex is
//! released. A stopped job is marked `Stopped` first; starting or deleting
//! it is refused until its worker has been deregistered.
//!
//! Parent/monitor coupling:
//!
//! - a Monitor can only start while its parent is Running;
//! - a parent cannot be stopped while its Monitor is Starting/Running
//!   (there is no cascade; stop the Monitor first);
//! - a job with Monitors cannot be deleted;
//! - when a Monitor is released its parent is released with it.

use std::sync::Arc;

use framewatch_core::error::CoreError;
use framewatch_core::job::{Job, JobKind, JobState, NewJob};
use framewatch_core::types::DbId;
use tokio::sync::Mutex;

use crate::store::JobStore;
use crate::supervisor::{StopOutcome, Supervisor, SupervisorError};

/// Longest accepted job name, in characters.
pub const MAX_NAME_LEN: usize = 128;

/// States from which a job may be started.
const STARTABLE: [JobState; 3] = [JobState::Stopped, JobState::Completed, JobState::Error];

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("job {0} not found")]
    NotFound(DbId),

    #[error("job {0} is already starting or running")]
    AlreadyActive(DbId),

    #[error("parent job {parent_id} of monitor {job_id} is not running")]
    ParentNotRunning { job_id: DbId, parent_id: DbId },

    #[error("job {job_id} has an active monitor ({monitor_id}); stop it first")]
    MonitorRunning { job_id: DbId, monitor_id: DbId },

    #[error("job {0} is starting or running")]
    StillActive(DbId),

    #[error("job {0} has monitor jobs")]
    HasMonitors(DbId),

    #[error("job {0} is still stopping")]
    Stopping(DbId),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Store(#[from] CoreError),
}

impl From<LifecycleError> for CoreError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(id) => CoreError::NotFound { entity: "Job", id },
            LifecycleError::Validation(msg) => CoreError::Validation(msg),
            LifecycleError::Store(e) => e,
            LifecycleError::Supervisor(e) => CoreError::Internal(e.to_string()),
            other @ (LifecycleError::AlreadyActive(_)
            | LifecycleError::ParentNotRunning { .. }
            | LifecycleError::MonitorRunning { .. }
            | LifecycleError::StillActive(_)
            | LifecycleError::HasMonitors(_)
            | LifecycleError::Stopping(_)) => CoreError::Conflict(other.to_string()),
        }
    }
}

/// Serializes job state transitions and worker start/stop.
pub struct LifecycleController {
    store: Arc<dyn JobStore>,
    supervisor: Arc<Supervisor>,
    ops: Mutex<()>,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn JobStore>, supervisor: Arc<Supervisor>) -> Self {
        Self {
            store,
            supervisor,
            ops: Mutex::new(()),
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: DbId) -> Result<Job, LifecycleError> {
        self.store
            .get(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Job>, LifecycleError> {
        Ok(self.store.list().await?)
    }

    // -----------------------------------------------------------------------
    // Register / delete
    // -----------------------------------------------------------------------

    /// Validate and store a new job in state `Stopped`.
    pub async fn register(&self, mut input: NewJob) -> Result<Job, LifecycleError> {
        let _ops = self.ops.lock().await;

        input.name = input.name.trim().to_string();
        if input.name.is_empty() {
            return Err(LifecycleError::Validation("Job name must not be empty".into()));
        }
        if input.name.chars().count() > MAX_NAME_LEN {
            return Err(LifecycleError::Validation(format!(
                "Job name must be at most {MAX_NAME_LEN} characters"
            )));
        }

        match input.kind {
            JobKind::Monitor => self.validate_monitor(&input).await?,
            JobKind::OfflineBatch | JobKind::LivePreview => {
                if input.parent_id.is_some() {
                    return Err(LifecycleError::Validation(format!(
                        "Only monitor jobs can have a parent; got kind {}",
                        input.kind
                    )));
                }
                let Some(source) = &input.source else {
                    return Err(LifecycleError::Validation(format!(
                        "A {} job requires a source",
                        input.kind
                    )));
                };
                if input.kind == JobKind::OfflineBatch && !source.is_finite() {
                    return Err(LifecycleError::Validation(
                        "An offline batch job requires a finite source (file or image sequence)"
                            .into(),
                    ));
                }
            }
        }

        let job = self.store.create(input).await?;
        tracing::info!(job_id = job.id, kind = %job.kind, name = %job.name, "Job registered");
        Ok(job)
    }

    async fn validate_monitor(&self, input: &NewJob) -> Result<(), LifecycleError> {
        let Some(parent_id) = input.parent_id else {
            return Err(LifecycleError::Validation(
                "A monitor job requires a parent_id".into(),
            ));
        };
        if input.source.is_some() {
            return Err(LifecycleError::Validation(
                "A monitor job uses its parent's source and cannot set its own".into(),
            ));
        }

        let parent = self
            .store
            .get(parent_id)
            .await?
            .ok_or(LifecycleError::NotFound(parent_id))?;
        if parent.kind == JobKind::Monitor {
            return Err(LifecycleError::Validation(
                "A monitor job cannot be the parent of another monitor".into(),
            ));
        }
        if !self.store.monitors_of(parent_id).await?.is_empty() {
            return Err(LifecycleError::Validation(format!(
                "Job {parent_id} already has a monitor"
            )));
        }
        Ok(())
    }

    /// Remove a job record. Active jobs and jobs with monitors are kept.
    pub async fn delete(&self, id: DbId) -> Result<(), LifecycleError> {
        let _ops = self.ops.lock().await;

        let job = self.get(id).await?;
        if job.state.is_active() {
            return Err(LifecycleError::StillActive(id));
        }
        if !self.store.monitors_of(id).await?.is_empty() {
            return Err(LifecycleError::HasMonitors(id));
        }
        if self.supervisor.is_registered(id).await {
            return Err(LifecycleError::Stopping(id));
        }

        if !self.store.delete(id).await? {
            return Err(LifecycleError::NotFound(id));
        }
        tracing::info!(job_id = id, "Job deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Start / stop
    // -----------------------------------------------------------------------

    /// Move a job to `Starting` and spawn its worker.
    ///
    /// On spawn failure the job ends in `Error` with the spawn error and no
    /// worker is registered.
    pub async fn start(&self, id: DbId) -> Result<Job, LifecycleError> {
        let _ops = self.ops.lock().await;

        let job = self.get(id).await?;
        if job.state.is_active() {
            return Err(LifecycleError::AlreadyActive(id));
        }

        let (source, processor) = match job.kind {
            JobKind::Monitor => {
                let parent_id = job.parent_id.ok_or_else(|| {
                    LifecycleError::Validation(format!("Monitor job {id} has no parent"))
                })?;
                let parent = self.get(parent_id).await?;
                if parent.state != JobState::Running {
                    return Err(LifecycleError::ParentNotRunning {
                        job_id: id,
                        parent_id,
                    });
                }
                let source = parent.source.ok_or_else(|| {
                    LifecycleError::Validation(format!("Parent job {parent_id} has no source"))
                })?;
                (source, parent.processor)
            }
            JobKind::OfflineBatch | JobKind::LivePreview => {
                let source = job.source.clone().ok_or_else(|| {
                    LifecycleError::Validation(format!("Job {id} has no source"))
                })?;
                (source, job.processor.clone())
            }
        };

        if self.supervisor.is_registered(id).await {
            return Err(LifecycleError::Stopping(id));
        }

        let job = self
            .store
            .transition(id, &STARTABLE, JobState::Starting, None)
            .await?
            .ok_or(LifecycleError::AlreadyActive(id))?;

        let spec = self.supervisor.spec_for(&job, source, processor);
        match self.supervisor.start(spec).await {
            Ok(handle) => {
                tracing::info!(job_id = id, pid = handle.pid, "Job starting");
                Ok(job)
            }
            Err(e) => {
                tracing::error!(job_id = id, error = %e, "Failed to start worker");
                self.store
                    .transition(id, &[JobState::Starting], JobState::Error, Some(e.to_string()))
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Move a job to `Stopped` and terminate its worker.
    ///
    /// Stopping an inactive job changes nothing but still makes sure no
    /// worker is registered for it.
    pub async fn stop(&self, id: DbId) -> Result<Job, LifecycleError> {
        let job = {
            let _ops = self.ops.lock().await;
            self.mark_stopped(id).await?
        };
        self.reap(id).await;
        Ok(job)
    }

    /// Record the stop in the store. The worker is left to [`Self::reap`].
    async fn mark_stopped(&self, id: DbId) -> Result<Job, LifecycleError> {
        let job = self.get(id).await?;
        if !job.state.is_active() {
            return Ok(job);
        }

        if let Some(monitor) = self.active_monitor(id).await? {
            return Err(LifecycleError::MonitorRunning {
                job_id: id,
                monitor_id: monitor.id,
            });
        }

        let stopped = self
            .store
            .transition(id, &JobState::ACTIVE, JobState::Stopped, None)
            .await?;
        match stopped {
            Some(job) => {
                tracing::info!(job_id = id, "Job stopped");
                Ok(job)
            }
            // The worker exited on its own and the liveness poll got there first.
            None => self.get(id).await,
        }
    }

    /// Terminate and deregister the worker of a job no longer active.
    async fn reap(&self, id: DbId) {
        let outcome = self.supervisor.stop(id).await;
        if outcome != StopOutcome::NotRegistered {
            tracing::debug!(job_id = id, ?outcome, "Worker reaped");
        }
    }

    /// Stop a live job once its last viewer has left.
    ///
    /// Called after a relay detaches. Returns the stopped job, or `None` if
    /// the job was left alone (still watched, not live, not active, or
    /// feeding an active monitor). Releasing a Monitor also releases its
    /// parent, which was kept running for it.
    pub async fn release(&self, id: DbId) -> Result<Option<Job>, LifecycleError> {
        let (job, parent) = {
            let _ops = self.ops.lock().await;
            let Some(job) = self.release_locked(id).await? else {
                return Ok(None);
            };
            let parent = match job.parent_id {
                Some(parent_id) => match self.release_locked(parent_id).await {
                    Ok(parent) => parent,
                    Err(e) => {
                        tracing::warn!(job_id = id, parent_id, error = %e, "Failed to release parent");
                        None
                    }
                },
                None => None,
            };
            (job, parent)
        };

        self.reap(id).await;
        if let Some(parent) = &parent {
            self.reap(parent.id).await;
        }
        Ok(Some(job))
    }

    async fn release_locked(&self, id: DbId) -> Result<Option<Job>, LifecycleError> {
        if let Some(channel) = self.supervisor.channel(id).await {
            if channel.subscriber_count() > 0 {
                return Ok(None);
            }
        }

        let job = self.get(id).await?;
        if !job.kind.is_live() || !job.state.is_active() {
            return Ok(None);
        }
        if self.active_monitor(id).await?.is_some() {
            return Ok(None);
        }

        tracing::info!(job_id = id, "Last subscriber left, stopping live job");
        self.mark_stopped(id).await.map(Some)
    }

    async fn active_monitor(&self, id: DbId) -> Result<Option<Job>, LifecycleError> {
        Ok(self
            .store
            .monitors_of(id)
            .await?
            .into_iter()
            .find(|m| m.state.is_active()))
    }
}
