pub mod vision;
pub mod retrieval;
pub mod generation;
pub mod orchestrator;
pub mod chat;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::registry::ModelKind;
use generation::GenerationError;
use retrieval::RetrievalError;
use vision::VisionError;

/// Errors surfaced at the core boundary.
#[derive(Error, Debug)]
pub enum AssistError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("{kind} model unavailable: {reason}")]
    ModelUnavailable { kind: ModelKind, reason: String },

    #[error("Retrieval index is not ready")]
    IndexNotReady,

    #[error("Report generation failed: {0}")]
    GenerationFailed(String),

    #[error("Reference corpus unavailable: {0}")]
    CorpusUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AssistError {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable { .. } | Self::IndexNotReady | Self::GenerationFailed(_)
        )
    }
}

impl From<VisionError> for AssistError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Decode(_) | VisionError::TooSmall | VisionError::TooLarge { .. } => {
                Self::InvalidImage(err.to_string())
            }
            VisionError::Inference(_) | VisionError::LabelMismatch { .. } | VisionError::ModelLoad(_) => {
                Self::ModelUnavailable {
                    kind: ModelKind::Classifier,
                    reason: err.to_string(),
                }
            }
        }
    }
}

impl From<RetrievalError> for AssistError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::NotReady => Self::IndexNotReady,
            RetrievalError::Embedding(_) | RetrievalError::ModelLoad(_) => Self::ModelUnavailable {
                kind: ModelKind::Embedder,
                reason: err.to_string(),
            },
            RetrievalError::EmptyCorpus
            | RetrievalError::CorpusIo { .. }
            | RetrievalError::CorpusParse(_)
            | RetrievalError::InconsistentDimension { .. } => Self::CorpusUnavailable(err.to_string()),
            RetrievalError::InvalidTopK | RetrievalError::DimensionMismatch { .. } => {
                Self::InvalidRequest(err.to_string())
            }
        }
    }
}

impl From<GenerationError> for AssistError {
    fn from(err: GenerationError) -> Self {
        Self::GenerationFailed(err.to_string())
    }
}

/// States of a single analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Classifying,
    Retrieving,
    Generating,
    Completed,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Classifying => write!(f, "classification"),
            Self::Retrieving => write!(f, "retrieval"),
            Self::Generating => write!(f, "generation"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An analysis that halted, with the stage it halted in.
#[derive(Error, Debug)]
#[error("Analysis failed during {stage}: {source}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    #[source]
    pub source: AssistError,
}

impl PipelineError {
    pub fn new(stage: PipelineStage, source: impl Into<AssistError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}
