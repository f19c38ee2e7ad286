use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use super::corpus::{embed_corpus, load_records, CorpusSource};
use super::index::RetrievalIndex;
use crate::pipeline::AssistError;
use crate::registry::{ModelKind, ModelRegistry};

/// What an index initialization call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum BuildOutcome {
    Built { cases: usize },
    AlreadyBuilt,
}

/// Loads, embeds and indexes a corpus at most once at a time.
///
/// Concurrent callers queue on the build lock; whoever gets it after a
/// successful build returns `AlreadyBuilt` without re-embedding.
pub struct IndexBuilder {
    registry: Arc<ModelRegistry>,
    index: Arc<RetrievalIndex>,
    lock: Mutex<()>,
}

impl IndexBuilder {
    pub fn new(registry: Arc<ModelRegistry>, index: Arc<RetrievalIndex>) -> Self {
        Self {
            registry,
            index,
            lock: Mutex::new(()),
        }
    }

    pub fn index(&self) -> &Arc<RetrievalIndex> {
        &self.index
    }

    pub async fn ensure_built(&self, source: CorpusSource) -> Result<BuildOutcome, AssistError> {
        if self.index.is_ready() {
            return Ok(BuildOutcome::AlreadyBuilt);
        }
        let _guard = self.lock.lock().await;
        if self.index.is_ready() {
            return Ok(BuildOutcome::AlreadyBuilt);
        }

        let started = Instant::now();
        let description = source.describe();
        info!(source = %description, "Building retrieval index");

        let embedder = self.registry.embedder().await?;
        let cases = tokio::task::spawn_blocking(move || {
            let records = load_records(&source)?;
            embed_corpus(&records, embedder.as_ref())
        })
        .await
        .map_err(|e| AssistError::ModelUnavailable {
            kind: ModelKind::Embedder,
            reason: format!("corpus embedding task aborted: {e}"),
        })??;

        let count = cases.len();
        if !self.index.build(cases)? {
            info!("Index was rebuilt while this build was embedding; keeping it");
            return Ok(BuildOutcome::AlreadyBuilt);
        }
        info!(
            cases = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Retrieval index ready"
        );
        Ok(BuildOutcome::Built { cases: count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CorpusCase, ReportRecord};
    use crate::pipeline::retrieval::RetrievalError;
    use crate::pipeline::generation::{LlmGenerate, MockLlm};
    use crate::pipeline::retrieval::embedder::{EmbeddingModel, MockEmbedder};
    use crate::pipeline::vision::{MockPathologyModel, PathologyModel};
    use crate::registry::ModelSlot;

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::new(
            ModelSlot::preloaded(
                ModelKind::Classifier,
                Arc::new(MockPathologyModel::new(&[])) as Arc<dyn PathologyModel>,
            ),
            ModelSlot::preloaded(
                ModelKind::Embedder,
                Arc::new(MockEmbedder::with_dimension(8)) as Arc<dyn EmbeddingModel>,
            ),
            ModelSlot::preloaded(
                ModelKind::Generator,
                Arc::new(MockLlm::fixed("ok")) as Arc<dyn LlmGenerate>,
            ),
        ))
    }

    fn records() -> Vec<ReportRecord> {
        vec![
            ReportRecord {
                id: Some("r1".into()),
                findings: Some("Enlarged cardiac silhouette.".into()),
                impression: Some("Cardiomegaly.".into()),
            },
            ReportRecord {
                id: Some("r2".into()),
                findings: None,
                impression: Some("No acute cardiopulmonary process.".into()),
            },
        ]
    }

    #[tokio::test]
    async fn builds_once_then_reports_already_built() {
        let builder = IndexBuilder::new(registry(), Arc::new(RetrievalIndex::new()));

        let first = builder
            .ensure_built(CorpusSource::Records(records()))
            .await
            .unwrap();
        assert_eq!(first, BuildOutcome::Built { cases: 2 });
        assert_eq!(builder.index().len(), 2);

        let second = builder
            .ensure_built(CorpusSource::Records(records()))
            .await
            .unwrap();
        assert_eq!(second, BuildOutcome::AlreadyBuilt);
    }

    #[tokio::test]
    async fn empty_corpus_is_unavailable() {
        let builder = IndexBuilder::new(registry(), Arc::new(RetrievalIndex::new()));
        let err = builder
            .ensure_built(CorpusSource::Records(vec![ReportRecord::default()]))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::CorpusUnavailable(_)));
        assert!(!builder.index().is_ready());
    }

    /// Embedder that installs a competing corpus mid-build.
    struct RebuildingEmbedder {
        index: Arc<RetrievalIndex>,
        inner: MockEmbedder,
    }

    impl EmbeddingModel for RebuildingEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            self.inner.embed(text)
        }

        fn embed_batch(
            &self,
            texts: &[&str],
        ) -> Result<Vec<Vec<f32>>, RetrievalError> {
            let competing = CorpusCase {
                id: "rebuilt".into(),
                report_text: "Impression: Rebuilt.".into(),
                embedding: self.inner.embed("Rebuilt")?,
            };
            self.index.rebuild(vec![competing])?;
            self.inner.embed_batch(texts)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[tokio::test]
    async fn build_that_loses_to_rebuild_reports_already_built() {
        let index = Arc::new(RetrievalIndex::new());
        let embedder = RebuildingEmbedder {
            index: Arc::clone(&index),
            inner: MockEmbedder::with_dimension(8),
        };
        let registry = Arc::new(ModelRegistry::new(
            ModelSlot::preloaded(
                ModelKind::Classifier,
                Arc::new(MockPathologyModel::new(&[])) as Arc<dyn PathologyModel>,
            ),
            ModelSlot::preloaded(
                ModelKind::Embedder,
                Arc::new(embedder) as Arc<dyn EmbeddingModel>,
            ),
            ModelSlot::preloaded(
                ModelKind::Generator,
                Arc::new(MockLlm::fixed("ok")) as Arc<dyn LlmGenerate>,
            ),
        ));
        let builder = IndexBuilder::new(registry, index);

        let outcome = builder
            .ensure_built(CorpusSource::Records(records()))
            .await
            .unwrap();
        assert_eq!(outcome, BuildOutcome::AlreadyBuilt);
        assert_eq!(builder.index().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_initialization_builds_once() {
        let builder = Arc::new(IndexBuilder::new(registry(), Arc::new(RetrievalIndex::new())));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let builder = Arc::clone(&builder);
                tokio::spawn(async move {
                    builder
                        .ensure_built(CorpusSource::Records(records()))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut built = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), BuildOutcome::Built { .. }) {
                built += 1;
            }
        }
        assert_eq!(built, 1);
        assert_eq!(builder.index().len(), 2);
    }
}
