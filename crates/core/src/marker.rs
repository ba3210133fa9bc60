//! Completion marker: the record a worker leaves behind when it fails.
//!
//! The marker is present iff the run failed. It is written atomically
//! (temp file in the same directory, then rename) so the supervisor never
//! reads a half-written record, and it is cleared before every new run.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

/// File name of the marker inside a job's output directory.
pub const MARKER_FILE_NAME: &str = "error.json";

/// Category of a worker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The source could not be opened at all.
    SourceUnavailable,
    /// The frame processor failed on an offline job.
    Processor,
    /// A live source could not be reopened within the reconnect budget.
    ReconnectExhausted,
    /// Anything else (I/O on artifacts, bad worker spec, ...).
    Internal,
}

/// JSON record describing why a worker failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub job_id: DbId,
    pub kind: FailureKind,
    /// Short human-readable reason, surfaced as the job's `last_error`.
    pub reason: String,
    /// Full error chain for operators.
    #[serde(default)]
    pub diagnostic: Option<String>,
    pub written_at: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    #[error("marker I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed marker at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CompletionMarker {
    pub fn new(job_id: DbId, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            job_id,
            kind,
            reason: reason.into(),
            diagnostic: None,
            written_at: chrono::Utc::now(),
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    /// Atomically write the marker to `path`.
    pub fn write(&self, path: &Path) -> Result<(), MarkerError> {
        let io_err = |source| MarkerError::Io {
            path: path.to_path_buf(),
            source,
        };
        let body = serde_json::to_vec_pretty(self).map_err(|source| MarkerError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = tmp_path(path);
        std::fs::write(&tmp, body).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    /// Read the marker at `path`; `Ok(None)` when no marker exists.
    pub fn read(path: &Path) -> Result<Option<Self>, MarkerError> {
        let body = match std::fs::read(path) {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(MarkerError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| MarkerError::Malformed {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Remove a stale marker. Missing markers are not an error.
    pub fn clear(path: &Path) -> Result<(), MarkerError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(MarkerError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
