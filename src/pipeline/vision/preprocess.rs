use image::imageops::FilterType;
use image::{GenericImageView, GrayImage};
use tracing::debug;

use super::VisionError;

/// Edge length of the square classifier input.
pub const MODEL_INPUT_SIZE: u32 = 224;

/// Smallest byte count a real image file can have.
const MIN_IMAGE_BYTES: usize = 8;

/// Pixel intensities are rescaled into [-PIXEL_RANGE, PIXEL_RANGE].
const PIXEL_RANGE: f32 = 1024.0;

/// Normalized single-channel image in row-major order, shape `[1, 1, H, W]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// NCHW shape as expected by the classifier.
    pub fn shape(&self) -> [usize; 4] {
        [1, 1, self.height as usize, self.width as usize]
    }
}

/// Reject empty or oversized uploads before decoding.
pub fn validate_image_bytes(bytes: &[u8], max_bytes: usize) -> Result<(), VisionError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(VisionError::TooSmall);
    }
    if bytes.len() > max_bytes {
        return Err(VisionError::TooLarge {
            limit_mb: max_bytes / (1024 * 1024),
        });
    }
    Ok(())
}

/// Decode, convert to grayscale, resize to `size`×`size` and rescale
/// intensities into [-1024, 1024].
pub fn preprocess(bytes: &[u8], size: u32, max_bytes: usize) -> Result<ImageTensor, VisionError> {
    validate_image_bytes(bytes, max_bytes)?;

    let img = image::load_from_memory(bytes).map_err(|e| VisionError::Decode(e.to_string()))?;
    debug!(
        width = img.width(),
        height = img.height(),
        target = size,
        "Decoded radiograph"
    );

    let gray = img.to_luma8();
    let resized = image::imageops::resize(&gray, size, size, FilterType::Triangle);
    Ok(normalize(&resized))
}

/// Min-max rescale. A constant image maps to all zeros.
fn normalize(gray: &GrayImage) -> ImageTensor {
    let raw = gray.as_raw();
    let (min, max) = raw
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    let range = max.saturating_sub(min) as f32;

    let data = if range == 0.0 {
        vec![0.0; raw.len()]
    } else {
        raw.iter()
            .map(|&p| ((p - min) as f32 / range) * (2.0 * PIXEL_RANGE) - PIXEL_RANGE)
            .collect()
    };

    ImageTensor {
        width: gray.width(),
        height: gray.height(),
        data,
    }
}
