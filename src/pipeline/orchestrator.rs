use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::generation::{GeneratorSettings, ReportGenerator};
use super::retrieval::{query_text, CorpusSource, IndexBuilder};
use super::vision::Classifier;
use super::{AssistError, PipelineError, PipelineStage};
use crate::config::AssistConfig;
use crate::models::{AnalysisResult, Finding, SimilarCase};
use crate::registry::{ModelKind, ModelRegistry};

/// Image analysis pipeline.
///
/// Drives one request through classify → retrieve → generate. Stages run
/// strictly in order; the first failure halts the run and is reported with
/// the stage it happened in. Model work runs on the blocking pool.
pub struct AnalysisPipeline {
    registry: Arc<ModelRegistry>,
    indexer: Arc<IndexBuilder>,
    classifier: Classifier,
    settings: GeneratorSettings,
    top_k: usize,
    lazy_corpus: Option<PathBuf>,
}

impl AnalysisPipeline {
    pub fn new(registry: Arc<ModelRegistry>, indexer: Arc<IndexBuilder>, config: &AssistConfig) -> Self {
        Self {
            registry,
            indexer,
            classifier: Classifier::from_config(config),
            settings: GeneratorSettings::from_config(config),
            top_k: config.top_k,
            lazy_corpus: config.corpus_path.clone(),
        }
    }

    /// Run one analysis to completion.
    pub async fn run(&self, image: Vec<u8>) -> Result<AnalysisResult, PipelineError> {
        self.run_observed(image, &mut |_: PipelineStage| {}).await
    }

    /// Like `run`, reporting every stage the run enters to `observer`.
    pub async fn run_observed(
        &self,
        image: Vec<u8>,
        observer: &mut (dyn FnMut(PipelineStage) + Send),
    ) -> Result<AnalysisResult, PipelineError> {
        let mut run = StageTracker::start(observer, image.len());

        run.advance(PipelineStage::Classifying);
        let findings = self.classify(image).await.map_err(|e| run.fail(e))?;

        run.advance(PipelineStage::Retrieving);
        let similar_cases = self.retrieve(&findings).await.map_err(|e| run.fail(e))?;

        run.advance(PipelineStage::Generating);
        let generated_report = self
            .generate(&findings, &similar_cases)
            .await
            .map_err(|e| run.fail(e))?;

        let elapsed = run.complete();
        info!(
            findings = findings.len(),
            similar_cases = similar_cases.len(),
            elapsed_ms = (elapsed * 1000.0) as u64,
            "Analysis complete"
        );

        Ok(AnalysisResult {
            findings,
            similar_cases,
            generated_report,
            processing_time_seconds: elapsed,
        })
    }

    async fn classify(&self, image: Vec<u8>) -> Result<Vec<Finding>, AssistError> {
        let model = self.registry.classifier().await?;
        let classifier = self.classifier.clone();
        let findings = tokio::task::spawn_blocking(move || classifier.predict(model.as_ref(), &image))
            .await
            .map_err(|e| aborted(ModelKind::Classifier, e))??;
        Ok(findings)
    }

    async fn retrieve(&self, findings: &[Finding]) -> Result<Vec<SimilarCase>, AssistError> {
        let index = self.indexer.index();
        if !index.is_ready() {
            self.build_lazily().await;
        }
        if !index.is_ready() {
            return Err(AssistError::IndexNotReady);
        }

        let embedder = self.registry.embedder().await?;
        let text = query_text(findings);
        debug!(query = %text, "Retrieving similar cases");
        let query = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| aborted(ModelKind::Embedder, e))??;

        Ok(index.query(&query, self.top_k)?)
    }

    async fn generate(
        &self,
        findings: &[Finding],
        similar_cases: &[SimilarCase],
    ) -> Result<String, AssistError> {
        let llm = self.registry.generator().await?;
        let generator = ReportGenerator::new(llm, self.settings.clone());
        let findings = findings.to_vec();
        let cases = similar_cases.to_vec();
        let report =
            tokio::task::spawn_blocking(move || generator.generate_report(&findings, &cases))
                .await
                .map_err(|e| aborted(ModelKind::Generator, e))??;
        Ok(report)
    }

    /// Build the index from the configured corpus file, if there is one.
    /// Failures are logged; the caller then reports `IndexNotReady`.
    async fn build_lazily(&self) {
        let Some(path) = &self.lazy_corpus else {
            return;
        };
        if let Err(e) = self
            .indexer
            .ensure_built(CorpusSource::JsonFile(path.clone()))
            .await
        {
            warn!(path = %path.display(), error = %e, "Lazy index build failed");
        }
    }
}

fn aborted(kind: ModelKind, err: tokio::task::JoinError) -> AssistError {
    AssistError::ModelUnavailable {
        kind,
        reason: format!("task aborted: {err}"),
    }
}

/// Current stage of one run, with timing and logging of transitions.
struct StageTracker<'a> {
    stage: PipelineStage,
    started: Instant,
    observer: &'a mut (dyn FnMut(PipelineStage) + Send),
}

impl<'a> StageTracker<'a> {
    fn start(observer: &'a mut (dyn FnMut(PipelineStage) + Send), bytes: usize) -> Self {
        debug!(bytes, "Analysis received");
        observer(PipelineStage::Received);
        Self {
            stage: PipelineStage::Received,
            started: Instant::now(),
            observer,
        }
    }

    fn advance(&mut self, next: PipelineStage) {
        debug!(from = %self.stage, to = %next, "Pipeline stage");
        self.stage = next;
        (self.observer)(next);
    }

    fn fail(&mut self, source: AssistError) -> PipelineError {
        let stage = self.stage;
        warn!(
            stage = %stage,
            error = %source,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Analysis failed"
        );
        self.stage = PipelineStage::Failed;
        (self.observer)(PipelineStage::Failed);
        PipelineError::new(stage, source)
    }

    /// Wall-clock seconds since the request was received.
    fn complete(&mut self) -> f64 {
        self.stage = PipelineStage::Completed;
        (self.observer)(PipelineStage::Completed);
        self.started.elapsed().as_secs_f64()
    }
}
