//! Job record storage.
//!
//! Durable storage is an external collaborator; the pipeline only needs the
//! operations on [`JobStore`]. [`MemoryJobStore`] keeps records in a map and
//! is what the service runs with.

use std::collections::HashMap;

use async_trait::async_trait;
use framewatch_core::error::CoreError;
use framewatch_core::job::{Job, JobState, NewJob};
use framewatch_core::types::DbId;
use tokio::sync::RwLock;

/// Storage operations the lifecycle controller and supervisor rely on.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in state `Stopped`. Names are unique.
    async fn create(&self, input: NewJob) -> Result<Job, CoreError>;

    async fn get(&self, id: DbId) -> Result<Option<Job>, CoreError>;

    /// All jobs ordered by id.
    async fn list(&self) -> Result<Vec<Job>, CoreError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Job>, CoreError>;

    /// Monitor jobs whose parent is `parent_id`.
    async fn monitors_of(&self, parent_id: DbId) -> Result<Vec<Job>, CoreError>;

    /// Returns `true` if a record was removed.
    async fn delete(&self, id: DbId) -> Result<bool, CoreError>;

    /// Compare-and-set state change.
    ///
    /// Moves the job to `to` only if its current state is one of `from`.
    /// Returns the updated job, or `None` if the state did not match.
    /// `error` becomes the job's `last_error` when moving to
    /// [`JobState::Error`].
    async fn transition(
        &self,
        id: DbId,
        from: &[JobState],
        to: JobState,
        error: Option<String>,
    ) -> Result<Option<Job>, CoreError>;
}

/// In-process [`JobStore`].
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: DbId,
    jobs: HashMap<DbId, Job>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: NewJob) -> Result<Job, CoreError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.values().any(|j| j.name == input.name) {
            return Err(CoreError::Conflict(format!(
                "A job named '{}' already exists",
                input.name
            )));
        }

        inner.next_id += 1;
        let now = chrono::Utc::now();
        let job = Job {
            id: inner.next_id,
            name: input.name,
            kind: input.kind,
            source: input.source,
            processor: input.processor,
            state: JobState::Stopped,
            parent_id: input.parent_id,
            last_error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: DbId) -> Result<Option<Job>, CoreError> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>, CoreError> {
        let mut jobs: Vec<Job> = self.inner.read().await.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Job>, CoreError> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .values()
            .find(|j| j.name == name)
            .cloned())
    }

    async fn monitors_of(&self, parent_id: DbId) -> Result<Vec<Job>, CoreError> {
        let mut monitors: Vec<Job> = self
            .inner
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.parent_id == Some(parent_id))
            .cloned()
            .collect();
        monitors.sort_by_key(|j| j.id);
        Ok(monitors)
    }

    async fn delete(&self, id: DbId) -> Result<bool, CoreError> {
        Ok(self.inner.write().await.jobs.remove(&id).is_some())
    }

    async fn transition(
        &self,
        id: DbId,
        from: &[JobState],
        to: JobState,
        error: Option<String>,
    ) -> Result<Option<Job>, CoreError> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(CoreError::NotFound { entity: "Job", id })?;

        if !from.contains(&job.state) {
            return Ok(None);
        }

        let now = chrono::Utc::now();
        job.state = to;
        job.updated_at = now;
        match to {
            JobState::Starting => {
                job.started_at = Some(now);
                job.finished_at = None;
                job.last_error = None;
            }
            JobState::Running => {}
            JobState::Error => {
                job.finished_at = Some(now);
                job.last_error = error;
            }
            JobState::Stopped | JobState::Completed => {
                job.finished_at = Some(now);
            }
        }
        Ok(Some(job.clone()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use framewatch_core::job::{JobKind, SourceDescriptor};
    use framewatch_core::processor::ProcessorConfig;

    use super::*;

    fn new_job(name: &str) -> NewJob {
        NewJob {
            name: name.into(),
            kind: JobKind::LivePreview,
            source: Some(SourceDescriptor::Stream {
                uri: "rtsp://cam/1".into(),
            }),
            processor: ProcessorConfig::Passthrough,
            parent_id: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_rejects_duplicate_names() {
        let store = MemoryJobStore::new();
        let a = store.create(new_job("a")).await.unwrap();
        let b = store.create(new_job("b")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.state, JobState::Stopped);

        let dup = store.create(new_job("a")).await;
        assert_matches!(dup, Err(CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("cam")).await.unwrap();

        let started = store
            .transition(job.id, &[JobState::Stopped], JobState::Starting, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started.state, JobState::Starting);
        assert!(started.started_at.is_some());

        let again = store
            .transition(job.id, &[JobState::Stopped], JobState::Starting, None)
            .await
            .unwrap();
        assert!(again.is_none());

        let failed = store
            .transition(
                job.id,
                &JobState::ACTIVE,
                JobState::Error,
                Some("boom".into()),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.last_error.as_deref(), Some("boom"));
        assert!(failed.finished_at.is_some());
    }

    #[tokio::test]
    async fn transition_of_missing_job_is_not_found() {
        let store = MemoryJobStore::new();
        let result = store
            .transition(99, &[JobState::Stopped], JobState::Starting, None)
            .await;
        assert_matches!(result, Err(CoreError::NotFound { id: 99, .. }));
    }

    #[tokio::test]
    async fn monitors_are_found_by_parent() {
        let store = MemoryJobStore::new();
        let parent = store.create(new_job("parent")).await.unwrap();
        let mut monitor = new_job("monitor");
        monitor.kind = JobKind::Monitor;
        monitor.source = None;
        monitor.parent_id = Some(parent.id);
        let monitor = store.create(monitor).await.unwrap();

        let found = store.monitors_of(parent.id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, monitor.id);
        assert!(store.monitors_of(monitor.id).await.unwrap().is_empty());
    }
}
