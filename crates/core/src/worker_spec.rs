//! The document a supervisor hands to a worker process on stdin.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectPolicy;
use crate::channel::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_ENQUEUE_TIMEOUT};
use crate::job::{Job, JobKind, SourceDescriptor};
use crate::processor::ProcessorConfig;
use crate::types::DbId;

/// Env var carrying the job id into the worker process.
pub const ENV_JOB_ID: &str = "FRAMEWATCH_JOB_ID";
/// Env var carrying the completion marker path into the worker process.
pub const ENV_COMPLETION_MARKER: &str = "FRAMEWATCH_COMPLETION_MARKER";

pub const DEFAULT_KEYFRAME_INTERVAL: u64 = 30;
pub const DEFAULT_LIVE_LOG_INTERVAL: u64 = 100;

/// Everything a worker needs to run one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub job_id: DbId,
    pub kind: JobKind,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub processor: ProcessorConfig,
    /// Job output directory (see [`crate::layout::ArtifactLayout`]).
    pub output_dir: PathBuf,
    pub channel_capacity: usize,
    pub enqueue_timeout_ms: u64,
    /// Offline jobs save every n-th frame as a keyframe.
    pub keyframe_interval: u64,
    /// A progress entry is logged every n frames.
    pub log_interval: u64,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl WorkerSpec {
    /// Build a spec for `job` reading from `source` with default tuning.
    ///
    /// `source` is passed separately because Monitor jobs run against their
    /// parent's source.
    pub fn for_job(
        job: &Job,
        source: SourceDescriptor,
        processor: ProcessorConfig,
        output_dir: PathBuf,
    ) -> Self {
        let log_interval = if job.kind.is_live() {
            DEFAULT_LIVE_LOG_INTERVAL
        } else {
            1
        };
        Self {
            job_id: job.id,
            kind: job.kind,
            source,
            processor,
            output_dir,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            enqueue_timeout_ms: DEFAULT_ENQUEUE_TIMEOUT.as_millis() as u64,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            log_interval,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Whether this run persists artifacts beyond the log.
    pub fn persists_artifacts(&self) -> bool {
        self.kind == JobKind::OfflineBatch
    }
}
