use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use framewatch_core::ffmpeg::{self, FfmpegError, VideoInfo};
use futures::StreamExt;
use tokio::process::{Child, ChildStdout};
use tokio_util::codec::FramedRead;

use super::mjpeg::JpegSplitter;
use super::{FrameSource, SourceError};

/// A video file or network stream decoded to JPEG frames by ffmpeg.
///
/// The ffmpeg process is killed when the source is dropped.
pub struct FfmpegSource {
    location: String,
    live: bool,
    info: VideoInfo,
    child: Child,
    frames: FramedRead<ChildStdout, JpegSplitter>,
}

impl FfmpegSource {
    pub async fn open_file(path: &Path) -> Result<Self, SourceError> {
        let info = ffmpeg::probe_file(path).await.map_err(unavailable)?;
        Self::spawn(path.as_os_str(), path.display().to_string(), false, info)
    }

    pub async fn open_stream(uri: &str) -> Result<Self, SourceError> {
        let info = ffmpeg::probe_stream(uri).await.map_err(unavailable)?;
        Self::spawn(OsStr::new(uri), uri.to_string(), true, info)
    }

    fn spawn(
        input: &OsStr,
        location: String,
        live: bool,
        info: VideoInfo,
    ) -> Result<Self, SourceError> {
        let mut child = ffmpeg::mjpeg_decode_command(input, live)
            .spawn()
            .map_err(|e| SourceError::Unavailable(format!("failed to start ffmpeg: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Unavailable("ffmpeg stdout not captured".into()))?;

        tracing::info!(
            source = %location,
            codec = %info.codec,
            width = info.width,
            height = info.height,
            fps = info.fps,
            "Opened video source",
        );

        Ok(Self {
            location,
            live,
            info,
            child,
            frames: FramedRead::new(stdout, JpegSplitter::new()),
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }
}

fn unavailable(err: FfmpegError) -> SourceError {
    SourceError::Unavailable(err.to_string())
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn next_frame(&mut self) -> Result<Option<Bytes>, SourceError> {
        match self.frames.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(SourceError::Read(format!("{}: {e}", self.location))),
            None if self.live => Err(SourceError::Read(format!(
                "stream {} ended",
                self.location
            ))),
            None => match self.child.wait().await {
                Ok(status) if status.success() => Ok(None),
                Ok(status) => Err(SourceError::Read(format!(
                    "ffmpeg failed decoding {} ({status})",
                    self.location
                ))),
                Err(e) => Err(SourceError::Read(e.to_string())),
            },
        }
    }
}
