//! ONNX Runtime backend for the densenet121-res224-all pathology model.
//!
//! The model directory holds:
//! - `model.onnx`: input `[1, 1, 224, 224]` float, output `[1, n_labels]`
//!   sigmoid scores
//! - `labels.json` (optional): JSON array of label names in output order;
//!   the default 18-label set is used when absent

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::TensorRef;

use super::{ImageTensor, PathologyModel, VisionError};
use crate::models::{PathologyLabel, DEFAULT_PATHOLOGIES};

pub struct OnnxPathologyModel {
    session: Mutex<Session>,
    labels: Vec<PathologyLabel>,
}

impl OnnxPathologyModel {
    pub fn load(model_dir: &Path) -> Result<Self, VisionError> {
        let model_path = model_dir.join("model.onnx");
        if !model_path.exists() {
            return Err(VisionError::ModelLoad(format!(
                "model not found: {}",
                model_path.display()
            )));
        }

        let labels = load_labels(model_dir)?;

        let session = Session::builder()
            .map_err(|e: ort::Error| VisionError::ModelLoad(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e: ort::Error| VisionError::ModelLoad(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e: ort::Error| VisionError::ModelLoad(format!("ONNX load failed: {e}")))?;

        tracing::info!(
            labels = labels.len(),
            "ONNX classifier loaded from {}",
            model_dir.display()
        );

        Ok(Self {
            session: Mutex::new(session),
            labels,
        })
    }
}

fn load_labels(model_dir: &Path) -> Result<Vec<PathologyLabel>, VisionError> {
    let labels_path = model_dir.join("labels.json");
    if !labels_path.exists() {
        return Ok(DEFAULT_PATHOLOGIES
            .iter()
            .map(|name| PathologyLabel::new(*name))
            .collect());
    }

    let raw = std::fs::read_to_string(&labels_path)
        .map_err(|e| VisionError::ModelLoad(format!("{}: {e}", labels_path.display())))?;
    let names: Vec<String> = serde_json::from_str(&raw)
        .map_err(|e| VisionError::ModelLoad(format!("{}: {e}", labels_path.display())))?;
    if names.is_empty() {
        return Err(VisionError::ModelLoad("labels.json is empty".into()));
    }
    Ok(names.into_iter().map(PathologyLabel::new).collect())
}

impl PathologyModel for OnnxPathologyModel {
    fn labels(&self) -> &[PathologyLabel] {
        &self.labels
    }

    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>, VisionError> {
        let [n, c, h, w] = input.shape();
        let array = ndarray::Array4::from_shape_vec((n, c, h, w), input.data.clone())
            .map_err(|e| VisionError::Inference(e.to_string()))?;
        let tensor =
            TensorRef::from_array_view(&array).map_err(|e| VisionError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| VisionError::Inference("Session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| VisionError::Inference(format!("ONNX inference failed: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::Inference(format!("Output extraction: {e}")))?;

        let width = shape.last().copied().unwrap_or(0) as usize;
        if width != self.labels.len() || data.len() < width {
            return Err(VisionError::LabelMismatch {
                expected: self.labels.len(),
                actual: width,
            });
        }

        Ok(data[..width].to_vec())
    }
}
