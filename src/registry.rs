//! Process-wide holders for the three pretrained models.
//!
//! Each model lives in a `ModelSlot` with the lifecycle
//! `uninitialized → loading → ready | failed`:
//! - the first `get()` starts exactly one load on the blocking pool;
//! - concurrent callers wait on that same load instead of starting their own;
//! - a failed load is recorded and reported to everyone who waited on it,
//!   the next `get()` after that retries;
//! - loads run in a detached task, so a caller dropping its future never
//!   leaves a slot stuck in `loading`.
//!
//! Loaders are injected, so tests substitute stub models and count loads.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;

use crate::config::AssistConfig;
use crate::pipeline::generation::ollama::OllamaGenerator;
use crate::pipeline::generation::LlmGenerate;
use crate::pipeline::retrieval::embedder::EmbeddingModel;
use crate::pipeline::vision::PathologyModel;
use crate::pipeline::AssistError;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Which pretrained model a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Image → pathology scores
    Classifier,
    /// Text → embedding vector
    Embedder,
    /// Prompt → report / answer text
    Generator,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classifier => write!(f, "Classifier"),
            Self::Embedder => write!(f, "Embedder"),
            Self::Generator => write!(f, "Generator"),
        }
    }
}

/// Why a model could not be loaded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct LoadError(pub String);

impl LoadError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Observable lifecycle state of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum LoadState {
    Uninitialized,
    Loading,
    Ready,
    Failed { reason: String },
}

/// Snapshot of one slot, exposing cold-start cost to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub kind: ModelKind,
    #[serde(flatten)]
    pub state: LoadState,
    /// Number of load attempts started so far.
    pub load_attempts: u64,
    /// Duration of the most recent finished attempt.
    pub last_load_ms: Option<u64>,
    /// When the model became ready (RFC 3339).
    pub loaded_at: Option<String>,
}

/// Factory invoked on the blocking pool to produce a model.
pub type Loader<T> = Arc<dyn Fn() -> Result<Arc<T>, LoadError> + Send + Sync>;

enum SlotState<T: ?Sized> {
    Uninitialized,
    Loading { done: watch::Receiver<bool> },
    Ready { model: Arc<T> },
    Failed { reason: String },
}

struct SlotInner<T: ?Sized> {
    state: SlotState<T>,
    attempts: u64,
    last_load: Option<Duration>,
    loaded_at: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// ModelSlot
// ═══════════════════════════════════════════════════════════

/// Lazily loaded, shared model handle.
pub struct ModelSlot<T: ?Sized> {
    kind: ModelKind,
    loader: Loader<T>,
    inner: Arc<Mutex<SlotInner<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> ModelSlot<T> {
    pub fn new<F>(kind: ModelKind, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<T>, LoadError> + Send + Sync + 'static,
    {
        Self {
            kind,
            loader: Arc::new(loader),
            inner: Arc::new(Mutex::new(SlotInner {
                state: SlotState::Uninitialized,
                attempts: 0,
                last_load: None,
                loaded_at: None,
            })),
        }
    }

    /// Slot that is ready from the start. The loader is never called.
    pub fn preloaded(kind: ModelKind, model: Arc<T>) -> Self {
        let slot = Self::new(kind, || Err(LoadError::new("preloaded slot has no loader")));
        if let Ok(mut inner) = slot.inner.lock() {
            inner.state = SlotState::Ready { model };
            inner.loaded_at = Some(chrono::Utc::now().to_rfc3339());
        }
        slot
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Return the model, loading it on first use.
    pub async fn get(&self) -> Result<Arc<T>, AssistError> {
        let mut waited = false;
        loop {
            let mut done = {
                let mut inner = self.lock()?;
                let pending = match &inner.state {
                    SlotState::Ready { model } => return Ok(Arc::clone(model)),
                    SlotState::Loading { done } => Some(done.clone()),
                    SlotState::Failed { reason } if waited => {
                        return Err(self.unavailable(reason.clone()));
                    }
                    SlotState::Uninitialized | SlotState::Failed { .. } => None,
                };
                match pending {
                    Some(done) => done,
                    None => self.start_load(&mut inner),
                }
            };

            // The sender flips to `true` only after the state is final. A
            // closed channel means the load task died without finishing.
            if done.wait_for(|finished| *finished).await.is_err() {
                self.abandon(&done)?;
            }
            waited = true;
        }
    }

    /// Whether the model is loaded and ready to serve.
    pub fn is_loaded(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| matches!(inner.state, SlotState::Ready { .. }))
            .unwrap_or(false)
    }

    pub fn status(&self) -> ModelStatus {
        match self.inner.lock() {
            Ok(inner) => ModelStatus {
                kind: self.kind,
                state: match &inner.state {
                    SlotState::Uninitialized => LoadState::Uninitialized,
                    SlotState::Loading { .. } => LoadState::Loading,
                    SlotState::Ready { .. } => LoadState::Ready,
                    SlotState::Failed { reason } => LoadState::Failed {
                        reason: reason.clone(),
                    },
                },
                load_attempts: inner.attempts,
                last_load_ms: inner.last_load.map(|d| d.as_millis() as u64),
                loaded_at: inner.loaded_at.clone(),
            },
            Err(_) => ModelStatus {
                kind: self.kind,
                state: LoadState::Failed {
                    reason: "slot lock poisoned".to_string(),
                },
                load_attempts: 0,
                last_load_ms: None,
                loaded_at: None,
            },
        }
    }

    // ── Internal ────────────────────────────────────────────

    fn lock(&self) -> Result<MutexGuard<'_, SlotInner<T>>, AssistError> {
        self.inner
            .lock()
            .map_err(|_| self.unavailable("slot lock poisoned".to_string()))
    }

    fn unavailable(&self, reason: String) -> AssistError {
        AssistError::ModelUnavailable {
            kind: self.kind,
            reason,
        }
    }

    /// Fail a load whose task was dropped before it could publish a result,
    /// so the next caller starts a fresh attempt.
    fn abandon(&self, done: &watch::Receiver<bool>) -> Result<(), AssistError> {
        let mut inner = self.lock()?;
        let stale = matches!(
            &inner.state,
            SlotState::Loading { done: current } if current.same_channel(done)
        );
        if stale {
            tracing::warn!(model = %self.kind, "Model load abandoned before completion");
            inner.state = SlotState::Failed {
                reason: "load abandoned".to_string(),
            };
        }
        Ok(())
    }

    /// Mark the slot as loading and spawn the load. Caller holds the lock.
    fn start_load(&self, inner: &mut SlotInner<T>) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        inner.state = SlotState::Loading { done: rx.clone() };
        inner.attempts += 1;

        let kind = self.kind;
        let attempt = inner.attempts;
        let loader = Arc::clone(&self.loader);
        let shared = Arc::clone(&self.inner);
        tracing::info!(model = %kind, attempt, "Loading model");

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match tokio::task::spawn_blocking(move || loader()).await {
                Ok(result) => result,
                Err(e) => Err(LoadError::new(format!("loader task aborted: {e}"))),
            };
            let elapsed = started.elapsed();

            match shared.lock() {
                Ok(mut inner) => {
                    inner.last_load = Some(elapsed);
                    let next = match outcome {
                        Ok(model) => {
                            tracing::info!(
                                model = %kind,
                                elapsed_ms = elapsed.as_millis() as u64,
                                "Model ready"
                            );
                            inner.loaded_at = Some(chrono::Utc::now().to_rfc3339());
                            SlotState::Ready { model }
                        }
                        Err(e) => {
                            tracing::warn!(model = %kind, attempt, error = %e, "Model load failed");
                            SlotState::Failed {
                                reason: e.to_string(),
                            }
                        }
                    };
                    inner.state = next;
                }
                Err(_) => tracing::error!(model = %kind, "Model slot lock poisoned"),
            }

            let _ = tx.send(true);
        });

        rx
    }
}

// ═══════════════════════════════════════════════════════════
// ModelRegistry
// ═══════════════════════════════════════════════════════════

/// Shared, injectable holder for the classifier, embedder and generator.
pub struct ModelRegistry {
    classifier: ModelSlot<dyn PathologyModel>,
    embedder: ModelSlot<dyn EmbeddingModel>,
    generator: ModelSlot<dyn LlmGenerate>,
}

impl ModelRegistry {
    pub fn new(
        classifier: ModelSlot<dyn PathologyModel>,
        embedder: ModelSlot<dyn EmbeddingModel>,
        generator: ModelSlot<dyn LlmGenerate>,
    ) -> Self {
        Self {
            classifier,
            embedder,
            generator,
        }
    }

    /// Registry backed by the production loaders: ONNX classifier and
    /// embedder (feature `onnx`), Ollama generator.
    pub fn from_config(config: &AssistConfig) -> Self {
        let classifier_dir = config.classifier_model_dir.clone();
        let embedding_dir = config.embedding_model_dir.clone();
        let ollama_url = config.ollama_url.clone();
        let llm_model = config.llm_model.clone();
        let timeout = config.ollama_timeout_secs;

        Self::new(
            ModelSlot::new(ModelKind::Classifier, move || load_classifier(&classifier_dir)),
            ModelSlot::new(ModelKind::Embedder, move || load_embedder(&embedding_dir)),
            ModelSlot::new(ModelKind::Generator, move || {
                let generator = OllamaGenerator::connect(&ollama_url, timeout, &llm_model)
                    .map_err(|e| LoadError::new(e.to_string()))?;
                Ok(Arc::new(generator) as Arc<dyn LlmGenerate>)
            }),
        )
    }

    pub async fn classifier(&self) -> Result<Arc<dyn PathologyModel>, AssistError> {
        self.classifier.get().await
    }

    pub async fn embedder(&self) -> Result<Arc<dyn EmbeddingModel>, AssistError> {
        self.embedder.get().await
    }

    pub async fn generator(&self) -> Result<Arc<dyn LlmGenerate>, AssistError> {
        self.generator.get().await
    }

    /// Load a model without using it.
    pub async fn ensure_loaded(&self, kind: ModelKind) -> Result<(), AssistError> {
        match kind {
            ModelKind::Classifier => self.classifier().await.map(|_| ()),
            ModelKind::Embedder => self.embedder().await.map(|_| ()),
            ModelKind::Generator => self.generator().await.map(|_| ()),
        }
    }

    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Classifier => self.classifier.is_loaded(),
            ModelKind::Embedder => self.embedder.is_loaded(),
            ModelKind::Generator => self.generator.is_loaded(),
        }
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        vec![
            self.classifier.status(),
            self.embedder.status(),
            self.generator.status(),
        ]
    }
}

#[cfg(feature = "onnx")]
fn load_classifier(dir: &std::path::Path) -> Result<Arc<dyn PathologyModel>, LoadError> {
    use crate::pipeline::vision::onnx::OnnxPathologyModel;
    let model = OnnxPathologyModel::load(dir).map_err(|e| LoadError::new(e.to_string()))?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "onnx"))]
fn load_classifier(dir: &std::path::Path) -> Result<Arc<dyn PathologyModel>, LoadError> {
    Err(LoadError::new(format!(
        "classifier at {} requires the `onnx` feature",
        dir.display()
    )))
}

#[cfg(feature = "onnx")]
fn load_embedder(dir: &std::path::Path) -> Result<Arc<dyn EmbeddingModel>, LoadError> {
    use crate::pipeline::retrieval::embedder::OnnxEmbedder;
    let model = OnnxEmbedder::load(dir).map_err(|e| LoadError::new(e.to_string()))?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "onnx"))]
fn load_embedder(dir: &std::path::Path) -> Result<Arc<dyn EmbeddingModel>, LoadError> {
    Err(LoadError::new(format!(
        "embedder at {} requires the `onnx` feature",
        dir.display()
    )))
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::pipeline::generation::MockLlm;

    fn counting_slot(
        loads: Arc<AtomicUsize>,
        delay: Duration,
    ) -> ModelSlot<dyn LlmGenerate> {
        ModelSlot::new(ModelKind::Generator, move || {
            loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(delay);
            Ok(Arc::new(MockLlm::fixed("ok")) as Arc<dyn LlmGenerate>)
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_loads_exactly_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(counting_slot(Arc::clone(&loads), Duration::from_millis(50)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let slot = Arc::clone(&slot);
                tokio::spawn(async move { slot.get().await.map(|_| ()) })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(slot.is_loaded());
        assert_eq!(slot.status().load_attempts, 1);
    }

    #[tokio::test]
    async fn repeated_get_returns_same_instance() {
        let loads = Arc::new(AtomicUsize::new(0));
        let slot = counting_slot(Arc::clone(&loads), Duration::ZERO);

        let a = slot.get().await.unwrap();
        let b = slot.get().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_reported_then_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let slot: ModelSlot<dyn LlmGenerate> = ModelSlot::new(ModelKind::Generator, move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LoadError::new("insufficient device memory"))
            } else {
                Ok(Arc::new(MockLlm::fixed("ok")) as Arc<dyn LlmGenerate>)
            }
        });

        let err = slot.get().await.err().unwrap();
        match &err {
            AssistError::ModelUnavailable { kind, reason } => {
                assert_eq!(*kind, ModelKind::Generator);
                assert!(reason.contains("insufficient device memory"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(slot.status().state, LoadState::Failed { .. }));
        assert!(!slot.is_loaded());

        slot.get().await.unwrap();
        assert!(slot.is_loaded());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiters_share_a_failed_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let slot: Arc<ModelSlot<dyn LlmGenerate>> =
            Arc::new(ModelSlot::new(ModelKind::Generator, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                Err(LoadError::new("weights missing"))
            }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                tokio::spawn(async move { slot.get().await.is_err() })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_wedge_the_slot() {
        let loads = Arc::new(AtomicUsize::new(0));
        let slot = counting_slot(Arc::clone(&loads), Duration::from_millis(100));

        let abandoned = tokio::time::timeout(Duration::from_millis(10), slot.get()).await;
        assert!(abandoned.is_err());

        slot.get().await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runtime_shutdown_mid_load_releases_the_slot() {
        let loads = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(counting_slot(Arc::clone(&loads), Duration::from_millis(300)));

        let first = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let cut_short =
            first.block_on(async { tokio::time::timeout(Duration::from_millis(20), slot.get()).await });
        assert!(cut_short.is_err());
        first.shutdown_background();

        let second = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let after_shutdown = second
            .block_on(async { tokio::time::timeout(Duration::from_secs(3), slot.get()).await })
            .expect("get must not hang on a dead load");
        match after_shutdown {
            Err(AssistError::ModelUnavailable { reason, .. }) => {
                assert_eq!(reason, "load abandoned")
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        second
            .block_on(async { tokio::time::timeout(Duration::from_secs(3), slot.get()).await })
            .expect("retry must not hang")
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(slot.status().load_attempts, 2);
    }

    #[tokio::test]
    async fn status_reports_load_duration() {
        let slot = counting_slot(Arc::new(AtomicUsize::new(0)), Duration::from_millis(20));
        assert_eq!(slot.status().state, LoadState::Uninitialized);

        slot.get().await.unwrap();
        let status = slot.status();
        assert_eq!(status.state, LoadState::Ready);
        assert!(status.last_load_ms.unwrap() >= 20);
        assert!(status.loaded_at.is_some());
    }

    #[tokio::test]
    async fn preloaded_slot_never_calls_loader() {
        let slot: ModelSlot<dyn LlmGenerate> =
            ModelSlot::preloaded(ModelKind::Generator, Arc::new(MockLlm::fixed("ok")));
        assert!(slot.is_loaded());
        slot.get().await.unwrap();
        assert_eq!(slot.status().load_attempts, 0);
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn default_classifier_without_onnx_is_unavailable() {
        let registry = ModelRegistry::from_config(&AssistConfig::default());
        let err = registry.classifier().await.err().unwrap();
        assert!(matches!(
            err,
            AssistError::ModelUnavailable { kind: ModelKind::Classifier, .. }
        ));
    }

    #[test]
    fn model_status_serializes_state_inline() {
        let status = ModelStatus {
            kind: ModelKind::Embedder,
            state: LoadState::Failed {
                reason: "missing".into(),
            },
            load_attempts: 1,
            last_load_ms: Some(3),
            loaded_at: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"kind\":\"embedder\""));
        assert!(json.contains("\"state\":\"failed\""));
        assert!(json.contains("\"reason\":\"missing\""));
    }

    #[test]
    fn model_kind_display() {
        assert_eq!(ModelKind::Classifier.to_string(), "Classifier");
        assert_eq!(ModelKind::Generator.to_string(), "Generator");
    }
}
