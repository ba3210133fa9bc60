//! Splits ffmpeg's `image2pipe` MJPEG output into individual JPEG images.
//!
//! Each image starts with SOI (`FF D8`) and ends with EOI (`FF D9`).
//! Entropy-coded data byte-stuffs `FF`, so the first EOI after an SOI ends
//! the image. Bytes before an SOI are discarded.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Largest accepted single image (16 MiB).
pub const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct JpegSplitter {
    /// Offset to resume the EOI search from.
    scanned: usize,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn find(haystack: &[u8], needle: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

impl Decoder for JpegSplitter {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        if self.scanned == 0 {
            match find(src, SOI) {
                Some(0) => {}
                Some(start) => {
                    let _ = src.split_to(start);
                }
                None => {
                    // Keep a trailing FF that may begin the next SOI.
                    let keep = usize::from(src.last() == Some(&0xFF));
                    let _ = src.split_to(src.len() - keep);
                    return Ok(None);
                }
            }
            self.scanned = SOI.len();
        }

        // Back up one byte so an EOI split across reads is still found.
        let from = self.scanned.saturating_sub(1).max(SOI.len());
        match find(&src[from..], EOI) {
            Some(pos) => {
                let end = from + pos + EOI.len();
                self.scanned = 0;
                Ok(Some(src.split_to(end).freeze()))
            }
            None => {
                if src.len() > MAX_IMAGE_BYTES {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "JPEG image exceeds maximum size",
                    ));
                }
                self.scanned = src.len();
                Ok(None)
            }
        }
    }
}
