use std::io;

use framewatch_core::layout::ArtifactLayout;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Persists annotated frames of an offline run.
///
/// Every frame is appended to `output.mjpeg`; every `keyframe_interval`-th
/// frame (starting with frame 0) is also saved as `frame_<n>.jpg`.
pub struct ArtifactWriter {
    layout: ArtifactLayout,
    output: BufWriter<File>,
    keyframe_interval: u64,
    frames: u64,
    keyframes: u64,
}

impl ArtifactWriter {
    /// Create (or truncate) the output artifact.
    pub async fn create(layout: ArtifactLayout, keyframe_interval: u64) -> io::Result<Self> {
        let output = File::create(layout.output_path()).await?;
        Ok(Self {
            layout,
            output: BufWriter::new(output),
            keyframe_interval: keyframe_interval.max(1),
            frames: 0,
            keyframes: 0,
        })
    }

    pub async fn write_frame(&mut self, index: u64, image: &[u8]) -> io::Result<()> {
        self.output.write_all(image).await?;
        self.frames += 1;

        if index % self.keyframe_interval == 0 {
            tokio::fs::write(self.layout.keyframe_path(index), image).await?;
            self.keyframes += 1;
        }
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn keyframes_written(&self) -> u64 {
        self.keyframes
    }

    /// Flush the output artifact to disk.
    pub async fn finish(&mut self) -> io::Result<()> {
        self.output.flush().await?;
        self.output.get_ref().sync_all().await
    }
}
