//! The frame-processor capability consumed by workers.
//!
//! Detection itself is external. A worker only needs "given an encoded
//! image, return an annotated image and a detection count"; the
//! [`FrameProcessor`] trait is that seam and [`ProcessorConfig`] selects
//! which implementation a job uses.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Default per-frame timeout for remote detectors.
pub const DEFAULT_PROCESSOR_TIMEOUT_MS: u64 = 5_000;

/// Processor selection stored on a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorConfig {
    /// Frames pass through unchanged with zero detections.
    #[default]
    Passthrough,
    /// Frames are POSTed to an external detector service.
    Http {
        endpoint: String,
        /// Model or weights reference forwarded to the detector.
        #[serde(default)]
        model: Option<String>,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_timeout_ms() -> u64 {
    DEFAULT_PROCESSOR_TIMEOUT_MS
}

/// Result of processing one frame.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    /// Annotated image, encoded the same way as the input.
    pub image: Bytes,
    /// Number of objects detected in the frame.
    pub detections: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("detector request failed: {0}")]
    Request(String),

    #[error("detector returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid detector response: {0}")]
    InvalidResponse(String),
}

/// Per-frame detection capability.
#[async_trait]
pub trait FrameProcessor: Send + Sync {
    /// Process one encoded frame.
    async fn process(&self, image: Bytes) -> Result<ProcessedFrame, ProcessorError>;
}
