//! Messages produced by a worker for its consumers.

use bytes::Bytes;

/// One message on a frame channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameMessage {
    /// An encoded (JPEG) frame.
    Image {
        /// Monotonic per-run sequence number.
        seq: u64,
        /// Capture time as Unix milliseconds.
        captured_at_ms: i64,
        payload: Bytes,
    },
    /// A frame could not be processed; the live loop skipped it.
    ProcessingError { reason: String },
    /// A finite source was fully consumed.
    EndOfStream,
}

impl FrameMessage {
    pub fn image(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self::Image {
            seq,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
            payload: payload.into(),
        }
    }

    /// Sequence number for image messages.
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Image { seq, .. } => Some(*seq),
            _ => None,
        }
    }
}
