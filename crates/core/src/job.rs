//! Job model: kinds, lifecycle states, and source descriptors.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::processor::ProcessorConfig;
use crate::types::{DbId, Timestamp};

/// What a job does with its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Finite video processed end to end; artifacts are persisted.
    OfflineBatch,
    /// Live view of a source; frames are only published.
    LivePreview,
    /// Live relay of a parent job's processed output.
    Monitor,
}

impl JobKind {
    /// Live kinds tolerate per-frame processing failures and never persist
    /// artifacts.
    pub fn is_live(self) -> bool {
        matches!(self, Self::LivePreview | Self::Monitor)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OfflineBatch => "offline_batch",
            Self::LivePreview => "live_preview",
            Self::Monitor => "monitor",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Stopped,
    Starting,
    Running,
    Completed,
    Error,
}

impl JobState {
    /// States in which a worker handle may exist.
    pub const ACTIVE: [JobState; 2] = [JobState::Starting, JobState::Running];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Where a worker reads frames from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// A video file decoded through ffmpeg.
    File { path: PathBuf },
    /// A directory of still images, read in lexical file-name order.
    ImageSequence { dir: PathBuf },
    /// A network stream (RTSP, HTTP, ...) decoded through ffmpeg.
    Stream { uri: String },
}

impl SourceDescriptor {
    /// Finite sources end; live sources are reopened after read failures.
    pub fn is_finite(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }

    /// Human-readable location for logs and diagnostics.
    pub fn location(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::ImageSequence { dir } => dir.display().to_string(),
            Self::Stream { uri } => uri.clone(),
        }
    }
}

/// A registered unit of video-analysis work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: DbId,
    pub name: String,
    pub kind: JobKind,
    /// `None` only for Monitor jobs, which inherit the parent's source.
    pub source: Option<SourceDescriptor>,
    pub processor: ProcessorConfig,
    pub state: JobState,
    /// Parent job for Monitor kind.
    pub parent_id: Option<DbId>,
    /// Reason recorded by the last failed run.
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

/// Input for registering a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub kind: JobKind,
    #[serde(default)]
    pub source: Option<SourceDescriptor>,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub parent_id: Option<DbId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stream_sources_are_live() {
        assert!(SourceDescriptor::File { path: "a.mp4".into() }.is_finite());
        assert!(SourceDescriptor::ImageSequence { dir: "frames".into() }.is_finite());
        assert!(!SourceDescriptor::Stream {
            uri: "rtsp://cam/1".into()
        }
        .is_finite());
    }

    #[test]
    fn active_states() {
        assert!(JobState::Starting.is_active());
        assert!(JobState::Running.is_active());
        assert!(!JobState::Stopped.is_active());
        assert!(!JobState::Completed.is_active());
        assert!(!JobState::Error.is_active());
    }

    #[test]
    fn source_descriptor_json_shape() {
        let source: SourceDescriptor =
            serde_json::from_str(r#"{"type":"stream","uri":"rtsp://cam/1"}"#).unwrap();
        assert_eq!(
            source,
            SourceDescriptor::Stream {
                uri: "rtsp://cam/1".into()
            }
        );
    }

    #[test]
    fn kind_display_matches_serde() {
        let json = serde_json::to_string(&JobKind::OfflineBatch).unwrap();
        assert_eq!(json, format!("\"{}\"", JobKind::OfflineBatch));
    }
}
