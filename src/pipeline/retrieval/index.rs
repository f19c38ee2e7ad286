use std::sync::{Arc, RwLock};

use tracing::info;

use super::RetrievalError;
use crate::models::{CorpusCase, SimilarCase};

/// Exact L2 nearest-neighbour index over an embedded corpus.
///
/// Built once and then read-only. The corpus is swapped in as a whole, so
/// concurrent queries see either no index or the complete one.
#[derive(Default)]
pub struct RetrievalIndex {
    built: RwLock<Option<Arc<BuiltIndex>>>,
}

struct BuiltIndex {
    cases: Vec<CorpusCase>,
    dimension: usize,
}

impl BuiltIndex {
    fn from_corpus(cases: Vec<CorpusCase>) -> Result<Self, RetrievalError> {
        let first = cases.first().ok_or(RetrievalError::EmptyCorpus)?;
        let dimension = first.embedding.len();
        for case in &cases {
            if case.embedding.len() != dimension || dimension == 0 {
                return Err(RetrievalError::InconsistentDimension {
                    case_id: case.id.clone(),
                    expected: dimension,
                    actual: case.embedding.len(),
                });
            }
        }
        Ok(Self { cases, dimension })
    }
}

impl RetrievalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `corpus`. Returns `false` without touching the index when
    /// it was already built.
    pub fn build(&self, corpus: Vec<CorpusCase>) -> Result<bool, RetrievalError> {
        if self.is_ready() {
            return Ok(false);
        }
        let built = BuiltIndex::from_corpus(corpus)?;
        let mut slot = self.write_slot();
        if slot.is_some() {
            return Ok(false);
        }
        info!(cases = built.cases.len(), dimension = built.dimension, "Retrieval index built");
        *slot = Some(Arc::new(built));
        Ok(true)
    }

    /// Replace the index with `corpus`, built or not.
    pub fn rebuild(&self, corpus: Vec<CorpusCase>) -> Result<(), RetrievalError> {
        let built = BuiltIndex::from_corpus(corpus)?;
        info!(cases = built.cases.len(), dimension = built.dimension, "Retrieval index rebuilt");
        *self.write_slot() = Some(Arc::new(built));
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Number of indexed cases; 0 before build.
    pub fn len(&self) -> usize {
        self.snapshot().map(|b| b.cases.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().map(|b| b.dimension)
    }

    /// The `min(k, len)` closest cases, nearest first. Equal distances keep
    /// corpus order.
    pub fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<SimilarCase>, RetrievalError> {
        if k == 0 {
            return Err(RetrievalError::InvalidTopK);
        }
        let built = self.snapshot().ok_or(RetrievalError::NotReady)?;
        if embedding.len() != built.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: built.dimension,
                actual: embedding.len(),
            });
        }

        let mut ranked: Vec<(f32, usize)> = built
            .cases
            .iter()
            .enumerate()
            .map(|(idx, case)| (l2_distance(embedding, &case.embedding), idx))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        Ok(ranked
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(pos, (distance, idx))| SimilarCase {
                rank: pos + 1,
                similarity: similarity_from_distance(distance),
                report_text: built.cases[idx].report_text.clone(),
            })
            .collect())
    }

    fn snapshot(&self) -> Option<Arc<BuiltIndex>> {
        match self.built.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<BuiltIndex>>> {
        self.built.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Map an L2 distance onto (0, 1]; identical vectors score 1.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}
