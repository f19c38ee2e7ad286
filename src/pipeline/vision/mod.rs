//! Image → pathology findings.
//!
//! `preprocess` turns raw upload bytes into the single-channel tensor the
//! classifier expects, `classifier` scores it and keeps the findings at or
//! above the confidence threshold.

pub mod classifier;
pub mod preprocess;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use classifier::{Classifier, LabelScore, MockPathologyModel};
pub use preprocess::{preprocess, validate_image_bytes, ImageTensor, MODEL_INPUT_SIZE};

use thiserror::Error;

use crate::models::PathologyLabel;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Image could not be decoded: {0}")]
    Decode(String),

    #[error("Image data is too small to be a valid image")]
    TooSmall,

    #[error("Image exceeds maximum size of {limit_mb} MB")]
    TooLarge { limit_mb: usize },

    #[error("Classifier inference failed: {0}")]
    Inference(String),

    #[error("Classifier returned {actual} scores for {expected} labels")]
    LabelMismatch { expected: usize, actual: usize },

    #[error("Classifier model load failed: {0}")]
    ModelLoad(String),
}

/// A multi-label chest X-ray pathology model.
///
/// `infer` returns one score in [0, 1] per entry of `labels()`, in the same
/// order. Implementations must be callable from several threads.
pub trait PathologyModel: Send + Sync {
    fn labels(&self) -> &[PathologyLabel];

    /// Square edge length the model was trained on.
    fn input_size(&self) -> u32 {
        MODEL_INPUT_SIZE
    }

    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>, VisionError>;
}
