//! On-disk layout of a job's output directory.
//!
//! ```text
//! <results>/job_<id>/
//!     output.mjpeg      concatenated annotated JPEG frames
//!     frame_<n>.jpg     keyframes
//!     process.log       compact progress log
//!     error.json        completion marker (failed runs only)
//! ```

use std::path::{Path, PathBuf};

use crate::marker::MARKER_FILE_NAME;
use crate::types::DbId;

pub const OUTPUT_FILE_NAME: &str = "output.mjpeg";
pub const LOG_FILE_NAME: &str = "process.log";

const KEYFRAME_PREFIX: &str = "frame_";
const KEYFRAME_SUFFIX: &str = ".jpg";

/// Paths of one job's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    job_dir: PathBuf,
}

impl ArtifactLayout {
    /// Layout for `job_id` under the shared results root.
    pub fn new(results_root: &Path, job_id: DbId) -> Self {
        Self {
            job_dir: results_root.join(format!("job_{job_id}")),
        }
    }

    /// Layout rooted at an explicit job directory.
    pub fn from_job_dir(job_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_dir: job_dir.into(),
        }
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn output_path(&self) -> PathBuf {
        self.job_dir.join(OUTPUT_FILE_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.job_dir.join(LOG_FILE_NAME)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.job_dir.join(MARKER_FILE_NAME)
    }

    pub fn keyframe_path(&self, frame: u64) -> PathBuf {
        self.job_dir
            .join(format!("{KEYFRAME_PREFIX}{frame}{KEYFRAME_SUFFIX}"))
    }

    /// Keyframe file names present on disk, ordered by frame index.
    ///
    /// A missing directory yields an empty list.
    pub async fn list_keyframes(&self) -> std::io::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.job_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(index) = keyframe_index(&name) {
                frames.push((index, name));
            }
        }
        frames.sort_by_key(|(index, _)| *index);
        Ok(frames.into_iter().map(|(_, name)| name).collect())
    }
}

/// Parse the frame index out of a `frame_<n>.jpg` file name.
pub fn keyframe_index(name: &str) -> Option<u64> {
    name.strip_prefix(KEYFRAME_PREFIX)?
        .strip_suffix(KEYFRAME_SUFFIX)?
        .parse()
        .ok()
}
