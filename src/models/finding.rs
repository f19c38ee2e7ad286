use std::fmt;

use serde::{Deserialize, Serialize};

/// Default pathology label set of the densenet121-res224-all classifier,
/// in model output order.
pub const DEFAULT_PATHOLOGIES: &[&str] = &[
    "Atelectasis",
    "Consolidation",
    "Infiltration",
    "Pneumothorax",
    "Edema",
    "Emphysema",
    "Fibrosis",
    "Effusion",
    "Pneumonia",
    "Pleural_Thickening",
    "Cardiomegaly",
    "Nodule",
    "Mass",
    "Hernia",
    "Lung Lesion",
    "Fracture",
    "Lung Opacity",
    "Enlarged Cardiomediastinum",
];

/// Name of an abnormality category the classifier can detect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathologyLabel(String);

impl PathologyLabel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathologyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PathologyLabel {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A detected abnormality with its classifier confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub name: PathologyLabel,
    /// Always within [0, 1].
    pub confidence: f32,
}

impl Finding {
    /// Confidence is clamped into [0, 1].
    pub fn new(name: impl Into<PathologyLabel>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Confidence as a whole percentage.
    pub fn percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }
}

/// Renders as `Name (NN%)`.
impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}%)", self.name, self.percent())
    }
}

/// Render findings as `Name (NN%)` pairs joined by commas.
pub fn render_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(Finding::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
