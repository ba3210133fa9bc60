//! Wire codec for frame messages on the worker's stdout pipe.
//!
//! Each message is a length-delimited frame (u32 big-endian length prefix,
//! handled by [`LengthDelimitedCodec`]) whose body is a one-byte tag
//! followed by the variant's fields:
//!
//! | Tag    | Variant           | Body                                          |
//! |--------|-------------------|-----------------------------------------------|
//! | `0x01` | `Image`           | `seq: u64`, `captured_at_ms: i64`, payload    |
//! | `0x02` | `ProcessingError` | UTF-8 reason                                  |
//! | `0x03` | `EndOfStream`     | empty                                         |

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::frame::FrameMessage;

/// Largest accepted frame body (32 MiB).
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

const TAG_IMAGE: u8 = 0x01;
const TAG_PROCESSING_ERROR: u8 = 0x02;
const TAG_END_OF_STREAM: u8 = 0x03;

/// Image header: tag + seq + timestamp.
const IMAGE_HEADER_LEN: usize = 1 + 8 + 8;

#[derive(Debug, thiserror::Error)]
pub enum FrameCodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("empty frame body")]
    Empty,

    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),

    #[error("truncated {0} frame")]
    Truncated(&'static str),

    #[error("processing error reason is not UTF-8")]
    InvalidReason,
}

/// Encoder/decoder pair for [`FrameMessage`] streams.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_BYTES)
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<FrameMessage> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, item: FrameMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = match item {
            FrameMessage::Image {
                seq,
                captured_at_ms,
                payload,
            } => {
                let mut body = BytesMut::with_capacity(IMAGE_HEADER_LEN + payload.len());
                body.put_u8(TAG_IMAGE);
                body.put_u64(seq);
                body.put_i64(captured_at_ms);
                body.extend_from_slice(&payload);
                body
            }
            FrameMessage::ProcessingError { reason } => {
                let mut body = BytesMut::with_capacity(1 + reason.len());
                body.put_u8(TAG_PROCESSING_ERROR);
                body.extend_from_slice(reason.as_bytes());
                body
            }
            FrameMessage::EndOfStream => {
                let mut body = BytesMut::with_capacity(1);
                body.put_u8(TAG_END_OF_STREAM);
                body
            }
        };
        self.inner.encode(body.freeze(), dst)?;
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = FrameMessage;
    type Error = FrameCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut body) = self.inner.decode(src)? else {
            return Ok(None);
        };
        if body.is_empty() {
            return Err(FrameCodecError::Empty);
        }

        match body.get_u8() {
            TAG_IMAGE => {
                if body.len() < IMAGE_HEADER_LEN - 1 {
                    return Err(FrameCodecError::Truncated("image"));
                }
                let seq = body.get_u64();
                let captured_at_ms = body.get_i64();
                Ok(Some(FrameMessage::Image {
                    seq,
                    captured_at_ms,
                    payload: body.freeze(),
                }))
            }
            TAG_PROCESSING_ERROR => {
                let reason =
                    String::from_utf8(body.to_vec()).map_err(|_| FrameCodecError::InvalidReason)?;
                Ok(Some(FrameMessage::ProcessingError { reason }))
            }
            TAG_END_OF_STREAM => Ok(Some(FrameMessage::EndOfStream)),
            other => Err(FrameCodecError::UnknownTag(other)),
        }
    }
}
