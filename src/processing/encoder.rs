//! Still-frame encoding for transport.

use base64::{Engine as _, engine::general_purpose};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

use crate::capture::CaptureHandle;
use crate::error::{SessionError, SessionResult};

/// One frame ready to send: base64 JPEG with no `data:` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    payload: String,
    width: u32,
    height: u32,
    encoded_len: usize,
}

impl EncodedFrame {
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Size of the JPEG before base64.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }
}

/// Rasterizes the preview surface into JPEG.
///
/// The JPEG scratch buffer is reused across calls, so memory stays bounded
/// by the largest single frame no matter how many cycles run.
#[derive(Debug)]
pub struct FrameEncoder {
    quality: u8,
    scratch: Vec<u8>,
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            scratch: Vec::new(),
        }
    }

    /// Encode whatever the handle's preview currently shows, at native
    /// resolution.
    pub fn capture(&mut self, handle: &CaptureHandle) -> SessionResult<EncodedFrame> {
        let frame = handle.current_frame()?;
        self.encode(&frame)
    }

    pub fn encode(&mut self, frame: &RgbImage) -> SessionResult<EncodedFrame> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(SessionError::encoding_unavailable("preview has no pixels"));
        }

        self.scratch.clear();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut self.scratch, self.quality);
            encoder
                .encode_image(frame)
                .map_err(|e| SessionError::encoding_unavailable(format!("jpeg: {e}")))?;
        }

        Ok(EncodedFrame {
            payload: general_purpose::STANDARD.encode(&self.scratch),
            width,
            height,
            encoded_len: self.scratch.len(),
        })
    }

    pub fn scratch_capacity(&self) -> usize {
        self.scratch.capacity()
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(92)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pattern::TestPatternSource;

    #[test]
    fn test_payload_is_bare_base64_jpeg() {
        let mut encoder = FrameEncoder::default();
        let frame = TestPatternSource::render(64, 48, 0);
        let encoded = encoder.encode(&frame).unwrap();

        assert!(!encoded.payload().starts_with("data:"));
        assert_eq!(encoded.dimensions(), (64, 48));

        let jpeg = general_purpose::STANDARD.decode(encoded.payload()).unwrap();
        assert_eq!(jpeg.len(), encoded.encoded_len());
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_scratch_buffer_does_not_grow_across_cycles() {
        let mut encoder = FrameEncoder::new(80);
        let frame = TestPatternSource::render(128, 96, 7);

        encoder.encode(&frame).unwrap();
        let capacity = encoder.scratch_capacity();
        for _ in 0..20 {
            encoder.encode(&frame).unwrap();
        }
        assert_eq!(encoder.scratch_capacity(), capacity);
    }

    #[test]
    fn test_empty_frame_is_unavailable() {
        let mut encoder = FrameEncoder::default();
        let err = encoder.encode(&RgbImage::new(0, 0)).unwrap_err();
        assert_eq!(err.category(), "encoding_unavailable");
    }
}
