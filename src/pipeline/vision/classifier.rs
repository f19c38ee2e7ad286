use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use super::preprocess::{preprocess, ImageTensor};
use super::{PathologyModel, VisionError};
use crate::config::AssistConfig;
use crate::models::{Finding, PathologyLabel, DEFAULT_PATHOLOGIES};

/// Per-label score as produced by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelScore {
    pub label: PathologyLabel,
    pub score: f32,
}

/// Thresholded multi-label classification over a `PathologyModel`.
///
/// Stateless apart from its settings, so it can be cloned into blocking tasks.
#[derive(Debug, Clone)]
pub struct Classifier {
    threshold: f32,
    max_image_bytes: usize,
}

impl Classifier {
    pub fn new(threshold: f32, max_image_bytes: usize) -> Self {
        Self {
            threshold,
            max_image_bytes,
        }
    }

    pub fn from_config(config: &AssistConfig) -> Self {
        Self::new(config.confidence_threshold, config.max_image_bytes)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Findings with confidence ≥ threshold, most confident first.
    /// Ties keep the model's label order.
    pub fn predict(
        &self,
        model: &dyn PathologyModel,
        image_bytes: &[u8],
    ) -> Result<Vec<Finding>, VisionError> {
        let scores = self.raw_scores(model, image_bytes)?;
        let findings = select_findings(&scores, self.threshold);
        debug!(
            labels = scores.len(),
            findings = findings.len(),
            threshold = self.threshold,
            "Classification complete"
        );
        Ok(findings)
    }

    /// Every label's score, in model label order, rounded to three decimals.
    pub fn scores(
        &self,
        model: &dyn PathologyModel,
        image_bytes: &[u8],
    ) -> Result<Vec<LabelScore>, VisionError> {
        let mut scores = self.raw_scores(model, image_bytes)?;
        for entry in &mut scores {
            entry.score = round3(entry.score);
        }
        Ok(scores)
    }

    fn raw_scores(
        &self,
        model: &dyn PathologyModel,
        image_bytes: &[u8],
    ) -> Result<Vec<LabelScore>, VisionError> {
        let tensor = preprocess(image_bytes, model.input_size(), self.max_image_bytes)?;
        let raw = model.infer(&tensor)?;
        let labels = model.labels();
        if raw.len() != labels.len() {
            return Err(VisionError::LabelMismatch {
                expected: labels.len(),
                actual: raw.len(),
            });
        }

        Ok(labels
            .iter()
            .zip(raw)
            .map(|(label, score)| LabelScore {
                label: label.clone(),
                score,
            })
            .collect())
    }
}

/// Keep finite raw scores at or above `threshold`, sorted by confidence
/// descending. Only the reported confidence is rounded.
pub fn select_findings(scores: &[LabelScore], threshold: f32) -> Vec<Finding> {
    let mut kept: Vec<&LabelScore> = scores
        .iter()
        .filter(|s| s.score.is_finite() && s.score >= threshold)
        .collect();
    // sort_by is stable, so equal scores keep label order
    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.into_iter()
        .map(|s| Finding::new(s.label.clone(), round3(s.score)))
        .collect()
}

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

// ═══════════════════════════════════════════════════════════
// Mock model
// ═══════════════════════════════════════════════════════════

/// Stand-in classifier returning fixed scores for any valid image.
pub struct MockPathologyModel {
    labels: Vec<PathologyLabel>,
    scores: Vec<f32>,
    calls: AtomicUsize,
}

impl MockPathologyModel {
    /// Scores are matched to `DEFAULT_PATHOLOGIES` by position; missing
    /// entries score 0.
    pub fn new(scores: &[f32]) -> Self {
        let labels: Vec<PathologyLabel> = DEFAULT_PATHOLOGIES
            .iter()
            .map(|name| PathologyLabel::new(*name))
            .collect();
        let mut padded = vec![0.0; labels.len()];
        for (slot, score) in padded.iter_mut().zip(scores) {
            *slot = *score;
        }
        Self {
            labels,
            scores: padded,
            calls: AtomicUsize::new(0),
        }
    }

    /// Mock with explicit labels and scores of the same length.
    pub fn with_labels(labels: &[&str], scores: &[f32]) -> Self {
        Self {
            labels: labels.iter().map(|l| PathologyLabel::new(*l)).collect(),
            scores: scores.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Score set with a single label above any sensible threshold.
    pub fn single(label: &str, score: f32) -> Self {
        let mut scores = vec![0.05; DEFAULT_PATHOLOGIES.len()];
        if let Some(idx) = DEFAULT_PATHOLOGIES.iter().position(|l| *l == label) {
            scores[idx] = score;
        }
        Self::new(&scores)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PathologyModel for MockPathologyModel {
    fn labels(&self) -> &[PathologyLabel] {
        &self.labels
    }

    fn infer(&self, input: &ImageTensor) -> Result<Vec<f32>, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if input.data.is_empty() {
            return Err(VisionError::Inference("empty input tensor".into()));
        }
        Ok(self.scores.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::vision::preprocess::tests::gradient_png;

    const LIMIT: usize = 10 * 1024 * 1024;

    fn classifier() -> Classifier {
        Classifier::new(0.30, LIMIT)
    }

    #[test]
    fn findings_are_thresholded_and_sorted() {
        let model = MockPathologyModel::with_labels(
            &["Cardiomegaly", "Edema", "Effusion", "Nodule"],
            &[0.72, 0.85, 0.10, 0.31],
        );
        let findings = classifier().predict(&model, &gradient_png(64, 64)).unwrap();

        let names: Vec<&str> = findings.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Edema", "Cardiomegaly", "Nodule"]);
        assert!(findings.iter().all(|f| f.confidence >= 0.30));
        assert!(findings
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn threshold_is_inclusive() {
        let model = MockPathologyModel::with_labels(&["Mass", "Hernia"], &[0.30, 0.299]);
        let findings = classifier().predict(&model, &gradient_png(32, 32)).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name.as_str(), "Mass");
    }

    #[test]
    fn ties_keep_label_order() {
        let model =
            MockPathologyModel::with_labels(&["Pneumonia", "Atelectasis", "Mass"], &[0.5, 0.5, 0.5]);
        let findings = classifier().predict(&model, &gradient_png(32, 32)).unwrap();
        let names: Vec<&str> = findings.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Pneumonia", "Atelectasis", "Mass"]);
    }

    #[test]
    fn nothing_above_threshold_is_empty_not_error() {
        let model = MockPathologyModel::new(&[0.1; 18]);
        let findings = classifier().predict(&model, &gradient_png(32, 32)).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn threshold_applies_before_rounding() {
        let model = MockPathologyModel::with_labels(&["Edema", "Mass"], &[0.2996, 0.30041]);
        let findings = classifier().predict(&model, &gradient_png(32, 32)).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name.as_str(), "Mass");
        assert_eq!(findings[0].confidence, 0.3);
    }

    #[test]
    fn scores_are_rounded_to_three_decimals() {
        let model = MockPathologyModel::with_labels(&["Edema"], &[0.123456]);
        let scores = classifier().scores(&model, &gradient_png(32, 32)).unwrap();
        assert_eq!(scores[0].score, 0.123);
    }

    #[test]
    fn nan_scores_are_dropped() {
        let model = MockPathologyModel::with_labels(&["Edema", "Mass"], &[f32::NAN, 0.9]);
        let findings = classifier().predict(&model, &gradient_png(32, 32)).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name.as_str(), "Mass");
    }

    #[test]
    fn label_count_mismatch_is_reported() {
        let model = MockPathologyModel::with_labels(&["Edema", "Mass"], &[0.9]);
        let err = classifier().predict(&model, &gradient_png(32, 32)).unwrap_err();
        assert!(matches!(
            err,
            VisionError::LabelMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn undecodable_image_never_reaches_model() {
        let model = MockPathologyModel::new(&[0.9]);
        let err = classifier().predict(&model, b"not an image at all").unwrap_err();
        assert!(matches!(err, VisionError::Decode(_)));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn single_mock_marks_one_label() {
        let model = MockPathologyModel::single("Cardiomegaly", 0.85);
        let findings = classifier().predict(&model, &gradient_png(32, 32)).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].to_string(), "Cardiomegaly (85%)");
    }
}
