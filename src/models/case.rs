use serde::{Deserialize, Serialize};

/// A historical report from the reference corpus, embedded at index-build time.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusCase {
    pub id: String,
    pub report_text: String,
    pub embedding: Vec<f32>,
}

/// A corpus case ranked against one query. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarCase {
    /// 1-based; rank 1 is the closest case.
    pub rank: usize,
    /// `1 / (1 + L2 distance)`, so always in (0, 1].
    pub similarity: f32,
    pub report_text: String,
}

/// One row of the reference corpus before embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub findings: Option<String>,
    #[serde(default)]
    pub impression: Option<String>,
}

impl ReportRecord {
    /// Combined report text, or `None` when the record has no usable content.
    pub fn report_text(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(findings) = non_blank(&self.findings) {
            parts.push(format!("Findings: {findings}"));
        }
        if let Some(impression) = non_blank(&self.impression) {
            parts.push(format!("Impression: {impression}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(findings: Option<&str>, impression: Option<&str>) -> ReportRecord {
        ReportRecord {
            id: None,
            findings: findings.map(String::from),
            impression: impression.map(String::from),
        }
    }

    #[test]
    fn report_text_combines_sections() {
        let text = record(Some("Heart size enlarged."), Some("Cardiomegaly."))
            .report_text()
            .unwrap();
        assert_eq!(text, "Findings: Heart size enlarged.\nImpression: Cardiomegaly.");
    }

    #[test]
    fn report_text_with_single_section() {
        let text = record(None, Some("No acute disease.")).report_text().unwrap();
        assert_eq!(text, "Impression: No acute disease.");
    }

    #[test]
    fn blank_record_has_no_text() {
        assert!(record(None, None).report_text().is_none());
        assert!(record(Some("   "), Some("")).report_text().is_none());
    }

    #[test]
    fn record_deserializes_with_missing_fields() {
        let rec: ReportRecord = serde_json::from_str(r#"{"impression": "Normal chest."}"#).unwrap();
        assert!(rec.id.is_none());
        assert!(rec.findings.is_none());
        assert_eq!(rec.impression.as_deref(), Some("Normal chest."));
    }
}
