//! RGB24 → JPEG.

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use telearm_hal::CameraFrame;
use telearm_types::ArmError;

/// Quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Encode `frame` as a baseline JPEG. `quality` is clamped to `1..=100`.
///
/// # Errors
///
/// Returns [`ArmError::Encode`] if the pixel buffer does not match the frame
/// geometry or the codec rejects the image.
pub fn encode_jpeg(frame: &CameraFrame, quality: u8) -> Result<Vec<u8>, ArmError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(ArmError::Encode(format!(
            "empty frame {}x{}",
            frame.width, frame.height
        )));
    }
    if frame.data.len() != frame.expected_len() {
        return Err(ArmError::Encode(format!(
            "{}x{} RGB24 frame needs {} bytes, got {}",
            frame.width,
            frame.height,
            frame.expected_len(),
            frame.data.len()
        )));
    }

    let mut buf = Vec::with_capacity(frame.data.len() / 8);
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| ArmError::Encode(e.to_string()))?;
    Ok(buf)
}
