//! Shared application core.
//!
//! `AssistCore` owns the model registry, the retrieval index and the
//! analysis pipeline. Wrap it in an `Arc` and share it between request
//! handlers; every method takes `&self`.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::AssistConfig;
use crate::models::{AnalysisResult, ChatTurn};
use crate::pipeline::generation::{GeneratorSettings, ReportGenerator};
use crate::pipeline::orchestrator::AnalysisPipeline;
use crate::pipeline::retrieval::{BuildOutcome, CorpusSource, IndexBuilder, RetrievalIndex};
use crate::pipeline::vision::{Classifier, LabelScore};
use crate::pipeline::{AssistError, PipelineError};
use crate::registry::{ModelKind, ModelRegistry, ModelStatus};

/// Readiness snapshot for health checks.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub classifier_loaded: bool,
    pub embedder_loaded: bool,
    pub generator_loaded: bool,
    pub index_ready: bool,
    pub corpus_size: usize,
    pub models: Vec<ModelStatus>,
}

pub struct AssistCore {
    config: AssistConfig,
    registry: Arc<ModelRegistry>,
    indexer: Arc<IndexBuilder>,
    pipeline: AnalysisPipeline,
    settings: GeneratorSettings,
}

impl AssistCore {
    /// Core with the production model loaders.
    pub fn new(config: AssistConfig) -> Self {
        let registry = ModelRegistry::from_config(&config);
        Self::with_registry(config, registry)
    }

    /// Core over an injected registry. Invalid config values fall back to
    /// their defaults.
    pub fn with_registry(config: AssistConfig, registry: ModelRegistry) -> Self {
        let config = config.sanitized();
        let registry = Arc::new(registry);
        let indexer = Arc::new(IndexBuilder::new(
            Arc::clone(&registry),
            Arc::new(RetrievalIndex::new()),
        ));
        let pipeline = AnalysisPipeline::new(Arc::clone(&registry), Arc::clone(&indexer), &config);
        let settings = GeneratorSettings::from_config(&config);
        Self {
            config,
            registry,
            indexer,
            pipeline,
            settings,
        }
    }

    pub fn config(&self) -> &AssistConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn index(&self) -> &RetrievalIndex {
        self.indexer.index()
    }

    /// Classify an image, retrieve similar cases and draft a report.
    pub async fn analyze(&self, image: Vec<u8>) -> Result<AnalysisResult, PipelineError> {
        self.pipeline.run(image).await
    }

    /// Every label's rounded score for an image, including those below the
    /// confidence threshold.
    pub async fn classify_scores(&self, image: Vec<u8>) -> Result<Vec<LabelScore>, AssistError> {
        let model = self.registry.classifier().await?;
        let classifier = Classifier::from_config(&self.config);
        let scores = tokio::task::spawn_blocking(move || classifier.scores(model.as_ref(), &image))
            .await
            .map_err(|e| AssistError::ModelUnavailable {
                kind: ModelKind::Classifier,
                reason: format!("task aborted: {e}"),
            })??;
        Ok(scores)
    }

    /// Chat grounding for an analysis, bounded by `case_report_chars`.
    pub fn case_context(&self, result: &AnalysisResult) -> String {
        result.case_context(self.config.case_report_chars)
    }

    /// Answer a question about a case. Stateless: the caller owns `history`.
    pub async fn chat(
        &self,
        history: &[ChatTurn],
        message: &str,
        case_context: &str,
    ) -> Result<String, AssistError> {
        if message.trim().is_empty() {
            return Err(AssistError::InvalidRequest("message is empty".into()));
        }

        let llm = self.registry.generator().await?;
        let generator = ReportGenerator::new(llm, self.settings.clone());
        let window = self.settings.history_window;
        let recent = history[history.len().saturating_sub(window)..].to_vec();
        let message = message.to_string();
        let case_context = case_context.to_string();

        let answer = tokio::task::spawn_blocking(move || {
            generator.answer(&recent, &message, &case_context)
        })
        .await
        .map_err(|e| AssistError::ModelUnavailable {
            kind: ModelKind::Generator,
            reason: format!("task aborted: {e}"),
        })??;
        Ok(answer)
    }

    pub fn status(&self) -> CoreStatus {
        let index = self.indexer.index();
        CoreStatus {
            classifier_loaded: self.registry.is_loaded(ModelKind::Classifier),
            embedder_loaded: self.registry.is_loaded(ModelKind::Embedder),
            generator_loaded: self.registry.is_loaded(ModelKind::Generator),
            index_ready: index.is_ready(),
            corpus_size: index.len(),
            models: self.registry.status(),
        }
    }

    /// Build the retrieval index from `source`. No-op once built.
    pub async fn init_index(&self, source: CorpusSource) -> Result<BuildOutcome, AssistError> {
        self.indexer.ensure_built(source).await
    }

    /// Load every model up front so the first request skips the cold start.
    pub async fn preload(&self) -> Result<(), AssistError> {
        for kind in [ModelKind::Classifier, ModelKind::Embedder, ModelKind::Generator] {
            self.registry.ensure_loaded(kind).await?;
        }
        info!("All models preloaded");
        Ok(())
    }
}
