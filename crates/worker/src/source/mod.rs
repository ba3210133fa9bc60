//! Frame sources a worker reads from.
//!
//! A source yields encoded frames one at a time. Finite sources return
//! `Ok(None)` once exhausted; live sources report a dropped stream as a
//! [`SourceError::Read`] so the caller can reopen them.

mod ffmpeg;
pub mod mjpeg;
mod sequence;

use async_trait::async_trait;
use bytes::Bytes;
use framewatch_core::job::SourceDescriptor;

pub use ffmpeg::FfmpegSource;
pub use sequence::ImageSequenceSource;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source could not be opened at all.
    #[error("{0}")]
    Unavailable(String),

    /// Reading the next frame failed.
    #[error("{0}")]
    Read(String),
}

/// A stream of encoded frames.
#[async_trait]
pub trait FrameSource: Send {
    /// The next frame, or `None` once a finite source is exhausted.
    async fn next_frame(&mut self) -> Result<Option<Bytes>, SourceError>;
}

/// Opens sources from their descriptors.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Opens image sequences from disk and everything else through ffmpeg.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOpener;

#[async_trait]
impl SourceOpener for DefaultOpener {
    async fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn FrameSource>, SourceError> {
        match source {
            SourceDescriptor::ImageSequence { dir } => {
                Ok(Box::new(ImageSequenceSource::open(dir).await?))
            }
            SourceDescriptor::File { path } => Ok(Box::new(FfmpegSource::open_file(path).await?)),
            SourceDescriptor::Stream { uri } => Ok(Box::new(FfmpegSource::open_stream(uri).await?)),
        }
    }
}
