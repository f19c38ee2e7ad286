use super::RetrievalError;

/// Output dimension of all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Text → fixed-dimension vector.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError>;
    fn dimension(&self) -> usize;
}

// ═══════════════════════════════════════════════════════════
// ONNX Embedder, behind the `onnx` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx")]
mod onnx {
    use super::{EmbeddingModel, RetrievalError, EMBEDDING_DIM};
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;

    /// all-MiniLM-L6-v2 on ONNX Runtime.
    ///
    /// The model directory holds `model.onnx` and `tokenizer.json`.
    /// The session sits behind a Mutex because `Session::run` takes `&mut self`.
    pub struct OnnxEmbedder {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
    }

    impl OnnxEmbedder {
        pub fn load(model_dir: &Path) -> Result<Self, RetrievalError> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");

            for path in [&model_path, &tokenizer_path] {
                if !path.exists() {
                    return Err(RetrievalError::ModelLoad(format!(
                        "not found: {}",
                        path.display()
                    )));
                }
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| RetrievalError::ModelLoad(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| RetrievalError::ModelLoad(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| {
                    RetrievalError::ModelLoad(format!("ONNX load failed: {e}"))
                })?;

            let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| RetrievalError::ModelLoad(format!("Tokenizer load failed: {e}")))?;

            tracing::info!("ONNX embedder loaded from {}", model_dir.display());

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }

        /// Mean-pooled, L2-normalized sentence embedding.
        fn infer(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            use ort::value::TensorRef;

            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| RetrievalError::Embedding(format!("tokenization: {e}")))?;

            let to_i64 = |v: &[u32]| v.iter().map(|&x| x as i64).collect::<Vec<i64>>();
            let input_ids = to_i64(encoding.get_ids());
            let attention_mask = to_i64(encoding.get_attention_mask());
            let token_type_ids = to_i64(encoding.get_type_ids());
            let seq_len = input_ids.len();

            let shaped = |v: Vec<i64>| {
                ndarray::Array2::from_shape_vec((1, seq_len), v)
                    .map_err(|e| RetrievalError::Embedding(e.to_string()))
            };
            let ids_array = shaped(input_ids)?;
            let mask_array = shaped(attention_mask.clone())?;
            let type_array = shaped(token_type_ids)?;

            let ids_tensor = TensorRef::from_array_view(&ids_array)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
            let mask_tensor = TensorRef::from_array_view(&mask_array)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
            let type_tensor = TensorRef::from_array_view(&type_array)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| RetrievalError::Embedding("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| RetrievalError::Embedding(format!("ONNX inference failed: {e}")))?;

            // [1, seq_len, EMBEDDING_DIM]
            let (shape, output_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RetrievalError::Embedding(format!("Output extraction: {e}")))?;

            if shape.len() != 3 || shape[2] as usize != EMBEDDING_DIM {
                return Err(RetrievalError::Embedding(format!(
                    "Unexpected output shape: {shape:?}, expected [1, {seq_len}, {EMBEDDING_DIM}]"
                )));
            }

            let mut pooled = vec![0.0f32; EMBEDDING_DIM];
            let mut mask_sum = 0.0f32;
            for (token_idx, &mask) in attention_mask.iter().enumerate() {
                let mask = mask as f32;
                mask_sum += mask;
                let offset = token_idx * EMBEDDING_DIM;
                for (dim_idx, p) in pooled.iter_mut().enumerate() {
                    *p += output_data[offset + dim_idx] * mask;
                }
            }
            if mask_sum > 0.0 {
                for val in &mut pooled {
                    *val /= mask_sum;
                }
            }

            Ok(super::l2_normalize(pooled))
        }
    }

    impl EmbeddingModel for OnnxEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            self.infer(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            texts.iter().map(|t| self.infer(t)).collect()
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedder;

fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in &mut vec {
            *val /= norm;
        }
    }
    vec
}

/// Deterministic embedder for tests and offline runs.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(EMBEDDING_DIM)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(deterministic_vector(text, self.dimension))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts
            .iter()
            .map(|t| deterministic_vector(t, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Hash-style unit vector derived from the text bytes.
fn deterministic_vector(text: &str, dim: usize) -> Vec<f32> {
    let bytes = text.as_bytes();
    let vec = (0..dim)
        .map(|i| {
            let byte = bytes.get(i % bytes.len().max(1)).copied().unwrap_or(0);
            (byte as f32 + i as f32) / 255.0
        })
        .collect();
    l2_normalize(vec)
}
